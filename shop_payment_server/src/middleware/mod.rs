mod signature;

pub use signature::{SignatureMiddlewareFactory, SignatureMiddlewareService, SignatureScheme};
