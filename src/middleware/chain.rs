//! Chain executor.
//!
//! A chain is the ordered list of links built for one request: the global
//! middleware that applies to it, then the matched route's own middleware,
//! then a terminal. Each link's reply is classified and either ends the chain
//! or hands control to the next link.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use super::{Kind, Middleware, Next};
use crate::error::HttpError;
use crate::event::Event;
use crate::handler::{BoxFuture, BoxedHandler};
use crate::reply::coerce;
use crate::response::Response;

/// What runs after the last middleware.
pub(crate) enum Terminal {
    Handler(BoxedHandler),
    /// No route matched.
    NotFound,
}

pub(crate) struct Chain {
    links: Vec<Arc<Middleware>>,
    terminal: Terminal,
}

impl Chain {
    pub(crate) fn new(links: Vec<Arc<Middleware>>, terminal: Terminal) -> Self {
        Self { links, terminal }
    }

    /// Runs the whole chain for `event`.
    pub(crate) async fn execute(self, event: Event) -> Result<Response, HttpError> {
        run(Arc::new(self), 0, event).await
    }
}

/// Runs links `index..` of `chain`.
///
/// Boxed because it recurses through interceptors.
pub(super) fn run(chain: Arc<Chain>, index: usize, event: Event) -> BoxFuture<Result<Response, HttpError>> {
    Box::pin(async move {
        let Some(link) = chain.links.get(index).cloned() else {
            return terminal(&chain.terminal, event).await;
        };

        match &link.kind {
            Kind::Observe(observer) => {
                let reply = observer.call(event.clone()).await;
                if reply.is_empty() {
                    run(chain, index + 1, event).await
                } else {
                    debug!(link = index, "observer short-circuited the chain");
                    coerce(reply, &event)
                }
            }
            Kind::Intercept(interceptor) => {
                let called = Arc::new(AtomicBool::new(false));
                let next = Next {
                    chain: Arc::clone(&chain),
                    index: index + 1,
                    event: event.clone(),
                    called: Arc::clone(&called),
                };
                let reply = (interceptor.as_ref())(event.clone(), next).await;

                if !reply.is_empty() || called.load(Ordering::Acquire) {
                    coerce(reply, &event)
                } else {
                    run(chain, index + 1, event).await
                }
            }
        }
    })
}

async fn terminal(terminal: &Terminal, event: Event) -> Result<Response, HttpError> {
    match terminal {
        Terminal::Handler(handler) => {
            let reply = handler.call(event.clone()).await;
            coerce(reply, &event)
        }
        Terminal::NotFound => Err(HttpError::not_found(event.path())),
    }
}
