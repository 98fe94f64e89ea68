//! Per-context usage record of one service.

use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::bundle::Bundle;
use crate::error::{BoxError, panic_message};
use crate::services::{ServiceObject, ServiceRegistration, ServiceSource, ServiceState};

/// How often one context holds one service, plus the object it was handed.
///
/// Lives in the context's services-in-use table while `use_count > 0`.
pub(crate) struct ServiceUse {
    registration: ServiceRegistration,
    use_count: u32,
    cached: Option<ServiceObject>,
}

impl ServiceUse {
    pub(crate) fn new(registration: ServiceRegistration) -> Self {
        Self {
            registration,
            use_count: 0,
            cached: None,
        }
    }

    #[inline]
    pub(crate) fn use_count(&self) -> u32 {
        self.use_count
    }

    /// Increments the use count and returns the service object, resolving it on
    /// first use. `Ok(None)` means the service was unregistered meanwhile.
    ///
    /// A factory error, panic, or a product that does not provide every
    /// registered interface is returned as `Err` and leaves the count untouched.
    pub(crate) fn get(&mut self, bundle: &Bundle) -> Result<Option<ServiceObject>, BoxError> {
        if self.registration.state() == ServiceState::Unregistered {
            return Ok(None);
        }
        if self.use_count == 0 || self.cached.is_none() {
            self.cached = Some(self.resolve(bundle)?);
        }
        self.use_count = self.use_count.saturating_add(1);
        Ok(self.cached.clone())
    }

    /// Decrements the use count; releases the object when it reaches zero.
    ///
    /// Returns `false` if the count was already zero.
    pub(crate) fn unget(&mut self, bundle: &Bundle) -> bool {
        if self.use_count == 0 {
            return false;
        }
        self.use_count -= 1;
        if self.use_count == 0 {
            self.release(bundle);
        }
        true
    }

    /// Zeroes the use count and releases the cached object.
    pub(crate) fn release(&mut self, bundle: &Bundle) {
        self.use_count = 0;
        let Some(object) = self.cached.take() else {
            return;
        };
        if let ServiceSource::Factory(factory) = self.registration.source() {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                factory.unget_service(bundle, &self.registration, &object)
            }));
            if let Err(payload) = outcome {
                tracing::warn!(
                    service = self.registration.id(),
                    bundle = %bundle,
                    "service factory panicked in unget_service: {}",
                    panic_message(payload.as_ref())
                );
            }
        }
    }

    fn resolve(&self, bundle: &Bundle) -> Result<ServiceObject, BoxError> {
        let factory = match self.registration.source() {
            ServiceSource::Object(object) => return Ok(object.clone()),
            ServiceSource::Factory(factory) => factory,
        };
        let object = catch_unwind(AssertUnwindSafe(|| {
            factory.get_service(bundle, &self.registration)
        }))
        .map_err(|payload| -> BoxError {
            format!("service factory panicked: {}", panic_message(payload.as_ref())).into()
        })??;

        if let Some(missing) = object.first_missing(self.registration.interfaces()) {
            return Err(format!(
                "service factory for service {} returned an object that does not provide {missing}",
                self.registration.id()
            )
            .into());
        }
        Ok(object)
    }
}
