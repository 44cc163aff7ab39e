mod demo;
mod scripted;
mod stub;

pub use demo::DemoBackend;
pub use scripted::ScriptedBackend;
pub use stub::StubBackend;
