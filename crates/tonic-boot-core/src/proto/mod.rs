//! Protocol bindings for the demo `greeter.Greeter` service, generated from
//! `proto/greeter.proto` by the build script.

#[allow(clippy::all, clippy::pedantic)]
pub mod greeter {
    tonic::include_proto!("greeter");
}
