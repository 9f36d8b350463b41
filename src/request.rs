use crate::error::IdbError;
use crate::storage::activity::{Activity, Hold};
use crate::storage::request::Request;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;

type Delivered<T> = (Result<T, IdbError>, Option<Hold>);

/// Awaits a native request. A failure without a cause becomes
/// [`IdbError::UnknownRequest`].
///
/// From delivery until this future has taken the outcome, the owning
/// transaction is held open, so the continuation that follows can still issue
/// requests against it.
pub async fn wait_on_request<T: Send + 'static>(request: Request<T>) -> Result<T, IdbError> {
    let (sender, receiver) = oneshot::channel::<Delivered<T>>();
    let sender = Arc::new(Mutex::new(Some(sender)));
    let activity = request.holder();
    {
        let sender = Arc::clone(&sender);
        let activity = activity.clone();
        request.on_success(move |value| deliver(&sender, activity.as_ref(), Ok(value)));
    }
    request.on_error(move |error| {
        deliver(
            &sender,
            activity.as_ref(),
            Err(error.unwrap_or(IdbError::UnknownRequest)),
        )
    });
    match receiver.await {
        Ok((result, _owed)) => result,
        Err(_) => Err(IdbError::UnknownRequest),
    }
}

fn deliver<T>(
    sender: &Mutex<Option<oneshot::Sender<Delivered<T>>>>,
    activity: Option<&Activity>,
    result: Result<T, IdbError>,
) {
    if let Some(sender) = sender.lock().take() {
        let _ = sender.send((result, activity.map(Activity::hold)));
    }
}

#[cfg(test)]
mod tests {
    use super::wait_on_request;
    use crate::error::{IdbError, IdbErrorCode};
    use crate::storage::activity::Activity;
    use crate::storage::request::Request;

    #[tokio::test]
    async fn resolves_with_the_request_value() {
        let (request, responder) = Request::<&'static str>::pair();
        responder.complete(Ok("Serenity"));
        assert_eq!(wait_on_request(request).await.expect("value"), "Serenity");
    }

    #[tokio::test]
    async fn normalizes_missing_causes() {
        let (request, responder) = Request::<u8>::pair();
        drop(responder);
        let err = wait_on_request(request).await.expect_err("failure");
        assert_eq!(err.code(), IdbErrorCode::UnknownRequest);

        let (request, responder) = Request::<u8>::pair();
        responder.complete(Err(IdbError::ReadOnly));
        let err = wait_on_request(request).await.expect_err("failure");
        assert_eq!(err.code(), IdbErrorCode::ReadOnly);
    }

    #[tokio::test]
    async fn delivery_holds_the_transaction_until_consumed() {
        let activity = Activity::default();
        let (request, responder) = Request::<u8>::pair_within(Some(activity.clone()));
        let mut waiting = Box::pin(wait_on_request(request));
        assert!(futures::poll!(waiting.as_mut()).is_pending());
        assert!(activity.is_idle());

        responder.complete(Ok(3));
        assert!(!activity.is_idle());
        assert_eq!(waiting.await.expect("value"), 3);
        assert!(activity.is_idle());
    }
}
