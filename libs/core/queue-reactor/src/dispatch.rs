//! First-handler-wins dispatch.
//!
//! Async handlers are tried first, then sync handlers, each list in
//! registration order. The first handler returning `Ok(true)` ends the search.
//! A handler error ends the search too and is returned to the reactor, which
//! decides between commit, rollback and logging. A message nobody claims is not
//! an error: it is logged and reported as `Ok(false)`.

use crate::error::ReactorError;
use crate::handler::{HandlerSet, ReplyChannel};
use crate::message::Message;
use tracing::{debug, warn};

/// Dispatch to plain handlers.
pub async fn dispatch(message: &Message, handlers: &HandlerSet) -> Result<bool, ReactorError> {
    for (key, handler) in handlers.async_handlers() {
        if handler.process(message).await? {
            debug!(handler = %key, "Message processed");
            return Ok(true);
        }
    }

    for (key, handler) in handlers.sync_handlers() {
        if handler.process(message)? {
            debug!(handler = %key, "Message processed");
            return Ok(true);
        }
    }

    unprocessed(message, handlers);
    Ok(false)
}

/// Dispatch to repliable handlers, giving each the reply channel.
pub async fn dispatch_with_reply(
    message: &Message,
    handlers: &HandlerSet,
    reply: &ReplyChannel,
) -> Result<bool, ReactorError> {
    for (key, handler) in handlers.async_reply_handlers() {
        if handler.process(message, reply).await? {
            debug!(handler = %key, "Message processed");
            return Ok(true);
        }
    }

    for (key, handler) in handlers.sync_reply_handlers() {
        if handler.process(message, reply)? {
            debug!(handler = %key, "Message processed");
            return Ok(true);
        }
    }

    unprocessed(message, handlers);
    Ok(false)
}

fn unprocessed(message: &Message, handlers: &HandlerSet) {
    warn!(
        message_id = %message.id,
        handlers = handlers.len(),
        "Message was not processed by any handler"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{
        AsyncMessageHandler, AsyncReplyHandler, Handler, MessageHandler, ReplyHandler,
    };
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct SyncCounter {
        claims: bool,
        calls: AtomicU32,
    }

    impl MessageHandler for SyncCounter {
        fn process(&self, _message: &Message) -> Result<bool, ReactorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.claims)
        }
    }

    #[derive(Default)]
    struct AsyncCounter {
        claims: bool,
        calls: AtomicU32,
    }

    #[async_trait]
    impl AsyncMessageHandler for AsyncCounter {
        async fn process(&self, _message: &Message) -> Result<bool, ReactorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.claims)
        }
    }

    // Second async type so both can be registered in one set.
    #[derive(Default)]
    struct OtherAsyncCounter(AsyncCounter);

    #[async_trait]
    impl AsyncMessageHandler for OtherAsyncCounter {
        async fn process(&self, message: &Message) -> Result<bool, ReactorError> {
            self.0.process(message).await
        }
    }

    struct Failing;

    #[async_trait]
    impl AsyncMessageHandler for Failing {
        async fn process(&self, _message: &Message) -> Result<bool, ReactorError> {
            Err(ReactorError::handler("cannot parse order"))
        }
    }

    struct Echo;

    impl ReplyHandler for Echo {
        fn process(&self, message: &Message, reply: &ReplyChannel) -> Result<bool, ReactorError> {
            reply.reply(Message::new(message.body.clone()))?;
            Ok(true)
        }
    }

    struct Silent;

    #[async_trait]
    impl AsyncReplyHandler for Silent {
        async fn process(
            &self,
            _message: &Message,
            _reply: &ReplyChannel,
        ) -> Result<bool, ReactorError> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_async_handler_wins_over_sync() {
        let async_handler = Arc::new(AsyncCounter {
            claims: true,
            ..Default::default()
        });
        let sync_handler = Arc::new(SyncCounter {
            claims: true,
            ..Default::default()
        });
        let set = HandlerSet::new([
            Handler::from_sync(sync_handler.clone()),
            Handler::from_async(async_handler.clone()),
        ]);

        assert!(dispatch(&Message::new("x"), &set).await.unwrap());
        assert_eq!(async_handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(sync_handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_falls_back_in_order() {
        let first = Arc::new(AsyncCounter::default());
        let second = Arc::new(OtherAsyncCounter::default());
        let sync_handler = Arc::new(SyncCounter {
            claims: true,
            ..Default::default()
        });
        let set = HandlerSet::new([
            Handler::from_async(first.clone()),
            Handler::from_async(second.clone()),
            Handler::from_sync(sync_handler.clone()),
        ]);

        assert!(dispatch(&Message::new("x"), &set).await.unwrap());
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.0.calls.load(Ordering::SeqCst), 1);
        assert_eq!(sync_handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unclaimed_message_is_not_an_error() {
        let set = HandlerSet::new([Handler::from_sync(Arc::new(SyncCounter::default()))]);
        assert!(!dispatch(&Message::new("x"), &set).await.unwrap());
        assert!(!dispatch(&Message::new("x"), &HandlerSet::default()).await.unwrap());
    }

    #[tokio::test]
    async fn test_handler_error_stops_the_chain() {
        let sync_handler = Arc::new(SyncCounter {
            claims: true,
            ..Default::default()
        });
        let set = HandlerSet::new([
            Handler::from_async(Arc::new(Failing)),
            Handler::from_sync(sync_handler.clone()),
        ]);

        let err = dispatch(&Message::new("x"), &set).await.unwrap_err();
        assert!(matches!(err, ReactorError::Handler(_)));
        assert_eq!(sync_handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reply_dispatch_uses_reply_handlers() {
        let request = Message::new("pong").with_reply_to("replies");
        let channel = ReplyChannel::for_request(&request);
        let set = HandlerSet::new([
            Handler::from_async_reply(Arc::new(Silent)),
            Handler::from_sync_reply(Arc::new(Echo)),
        ]);

        assert!(dispatch_with_reply(&request, &set, &channel).await.unwrap());

        let replies = channel.drain();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].body, b"pong".to_vec());
    }
}
