//! # Bundle activator trait.
//!
//! An activator is the code a bundle runs when it is started and stopped.
//! [`BundleContext::start`](crate::BundleContext::start) and
//! [`BundleContext::stop`](crate::BundleContext::stop) invoke it and wrap any error
//! (or panic) into [`FrameworkError::BundleActivator`](crate::FrameworkError::BundleActivator),
//! which is returned to the caller rather than logged.

use crate::core::BundleContext;
use crate::error::BoxError;

/// Start/stop entry points of a bundle.
///
/// # Example
/// ```
/// use bundlevisor::{BoxError, BundleActivator, BundleContext, Properties, ServiceObject};
///
/// struct Greeter;
///
/// impl BundleActivator for Greeter {
///     fn start(&self, ctx: &BundleContext) -> Result<(), BoxError> {
///         let svc = ServiceObject::new(String::from("hello")).provides(["Greeting"]);
///         ctx.register_service(&["Greeting"], svc, Properties::new())?;
///         Ok(())
///     }
///
///     fn stop(&self, _ctx: &BundleContext) -> Result<(), BoxError> {
///         Ok(())
///     }
/// }
/// ```
pub trait BundleActivator: Send + Sync + 'static {
    /// Called once when the bundle starts. Services registered here stay
    /// published until the bundle's context is closed.
    fn start(&self, context: &BundleContext) -> Result<(), BoxError>;

    /// Called once when the bundle stops, before its context is closed.
    fn stop(&self, context: &BundleContext) -> Result<(), BoxError>;
}
