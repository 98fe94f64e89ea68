//! # Example: Echo service
//!
//! A provider bundle publishes two `Echo` services with different rankings, a
//! client bundle picks the best one, and every event is printed by `LogWriter`.
//!
//! Run with: `cargo run --example echo_service --features logging`

use std::sync::Arc;
use std::time::Duration;

use bundlevisor::{
    BoxError, BundleActivator, BundleContext, Config, FrameworkListener, LogWriter, MemoryHost,
    Properties, Runtime, ServiceObject,
};

struct Echo {
    prefix: &'static str,
}

impl Echo {
    fn echo(&self, text: &str) -> String {
        format!("{}{text}", self.prefix)
    }
}

struct Provider;

impl BundleActivator for Provider {
    fn start(&self, ctx: &BundleContext) -> Result<(), BoxError> {
        let plain = ServiceObject::new(Echo { prefix: "" }).provides(["Echo"]);
        let loud = ServiceObject::new(Echo { prefix: ">> " }).provides(["Echo"]);
        ctx.register_service(["Echo"], plain, Properties::new())?;
        ctx.register_service(["Echo"], loud, Properties::new().with("service.ranking", 10))?;
        Ok(())
    }

    fn stop(&self, _ctx: &BundleContext) -> Result<(), BoxError> {
        println!("[provider] stopping");
        Ok(())
    }
}

struct Client;

impl BundleActivator for Client {
    fn start(&self, ctx: &BundleContext) -> Result<(), BoxError> {
        let Some(reference) = ctx.get_service_reference("Echo")? else {
            return Err("no Echo service".into());
        };
        if let Some(service) = ctx.get_service(&reference)? {
            if let Some(echo) = service.downcast_ref::<Echo>() {
                println!("[client] {}", echo.echo("hello"));
            }
            ctx.unget_service(&reference)?;
        }
        Ok(())
    }

    fn stop(&self, _ctx: &BundleContext) -> Result<(), BoxError> {
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let host = Arc::new(MemoryHost::new());
    let writer = Arc::new(LogWriter::new());
    let runtime = Runtime::builder(Config::default())
        .with_host(host.clone())
        .with_framework_listeners(vec![writer.clone() as Arc<dyn FrameworkListener>])
        .build();

    let system = runtime.system_context();
    system.add_synchronous_bundle_listener(writer.clone())?;
    system.add_service_listener(writer, None)?;
    runtime.launch();

    let provider = host.install("echo.provider", "file:echo-provider");
    let client = host.install("echo.client", "file:echo-client");
    runtime.start_bundle(&provider, Arc::new(Provider))?;
    runtime.start_bundle(&client, Arc::new(Client))?;

    // let the worker print the asynchronous framework events
    std::thread::sleep(Duration::from_millis(100));
    runtime.shutdown();
    Ok(())
}
