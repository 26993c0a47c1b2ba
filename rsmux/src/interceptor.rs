//! Chain-of-responsibility decoration of the responder.
//!
//! Interceptors are applied once, at connection assembly. Composition is
//! left to right: the first interceptor added sits outermost and sees
//! every interaction before the rest of the chain.

use std::sync::Arc;

use crate::handler::RSocket;

/// Decorates the user handler with cross-cutting behavior.
pub trait ResponderInterceptor: Send + Sync {
    fn decorate(&self, responder: Arc<dyn RSocket>) -> Arc<dyn RSocket>;
}

impl<F> ResponderInterceptor for F
where
    F: Fn(Arc<dyn RSocket>) -> Arc<dyn RSocket> + Send + Sync,
{
    fn decorate(&self, responder: Arc<dyn RSocket>) -> Arc<dyn RSocket> {
        self(responder)
    }
}

/// An ordered collection of interceptors.
#[derive(Default)]
pub struct InterceptorRegistry {
    responders: Vec<Box<dyn ResponderInterceptor>>,
}

impl InterceptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a responder interceptor to the chain.
    pub fn add_responder(&mut self, interceptor: impl ResponderInterceptor + 'static) -> &mut Self {
        self.responders.push(Box::new(interceptor));
        self
    }

    /// Wrap the handler in the whole chain, first-added outermost.
    pub fn decorate(&self, responder: Arc<dyn RSocket>) -> Arc<dyn RSocket> {
        self.responders
            .iter()
            .rev()
            .fold(responder, |inner, interceptor| interceptor.decorate(inner))
    }
}
