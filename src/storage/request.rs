use crate::error::IdbError;
use crate::storage::activity::Activity;
use crate::storage::cursor::CursorHandle;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

type SuccessHandler<T> = Box<dyn FnOnce(T) + Send>;
type ErrorHandler = Box<dyn FnOnce(Option<IdbError>) + Send>;

/// Outcome of a request. A failure may carry no error at all.
type Outcome<T> = Result<T, Option<IdbError>>;

struct Slot<T> {
    outcome: Option<Outcome<T>>,
    on_success: Option<SuccessHandler<T>>,
    on_error: Option<ErrorHandler>,
}

/// One-shot request issued against the engine.
///
/// Handlers may be attached before or after the request settles; an outcome
/// that arrives first is held until a matching handler is attached.
pub struct Request<T> {
    slot: Arc<Mutex<Slot<T>>>,
    activity: Option<Activity>,
}

/// Engine side of a [`Request`]. Dropping it unsettled fails the request
/// without a cause.
pub(crate) struct Responder<T: Send + 'static> {
    slot: Option<Arc<Mutex<Slot<T>>>>,
}

enum Ready<T> {
    Success(SuccessHandler<T>, T),
    Error(ErrorHandler, Option<IdbError>),
}

impl<T: Send + 'static> Request<T> {
    pub(crate) fn pair() -> (Request<T>, Responder<T>) {
        Self::pair_within(None)
    }

    /// A request whose consumers hold `activity` from delivery until they
    /// have taken the outcome.
    pub(crate) fn pair_within(activity: Option<Activity>) -> (Request<T>, Responder<T>) {
        let slot = Arc::new(Mutex::new(Slot {
            outcome: None,
            on_success: None,
            on_error: None,
        }));
        (
            Request {
                slot: Arc::clone(&slot),
                activity,
            },
            Responder { slot: Some(slot) },
        )
    }

    pub fn on_success(&self, handler: impl FnOnce(T) + Send + 'static) {
        self.slot.lock().on_success = Some(Box::new(handler));
        dispatch(&self.slot);
    }

    pub fn on_error(&self, handler: impl FnOnce(Option<IdbError>) + Send + 'static) {
        self.slot.lock().on_error = Some(Box::new(handler));
        dispatch(&self.slot);
    }

    /// Whether the request settled and its outcome is still waiting for a handler.
    pub fn is_settled(&self) -> bool {
        self.slot.lock().outcome.is_some()
    }

    /// Activity of the owning transaction. A consumer takes a hold on it when
    /// the outcome is delivered and releases it once the outcome is consumed.
    pub(crate) fn holder(&self) -> Option<Activity> {
        self.activity.clone()
    }
}

fn dispatch<T>(slot: &Mutex<Slot<T>>) {
    let ready = {
        let mut slot = slot.lock();
        match slot.outcome.take() {
            Some(Ok(value)) => match slot.on_success.take() {
                Some(handler) => {
                    slot.on_error = None;
                    Some(Ready::Success(handler, value))
                }
                None => {
                    slot.outcome = Some(Ok(value));
                    None
                }
            },
            Some(Err(error)) => match slot.on_error.take() {
                Some(handler) => {
                    slot.on_success = None;
                    Some(Ready::Error(handler, error))
                }
                None => {
                    slot.outcome = Some(Err(error));
                    None
                }
            },
            None => None,
        }
    };
    match ready {
        Some(Ready::Success(handler, value)) => handler(value),
        Some(Ready::Error(handler, error)) => handler(error),
        None => {}
    }
}

impl<T: Send + 'static> Responder<T> {
    pub(crate) fn complete(mut self, result: Result<T, IdbError>) {
        if let Some(slot) = self.slot.take() {
            slot.lock().outcome = Some(result.map_err(Some));
            dispatch(&slot);
        }
    }
}

impl<T: Send + 'static> Drop for Responder<T> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.lock().outcome = Some(Err(None));
            dispatch(&slot);
        }
    }
}

type CursorSuccessHandler = Box<dyn FnMut(Option<CursorHandle>) + Send>;
type CursorErrorHandler = Box<dyn FnMut(Option<IdbError>) + Send>;

#[derive(Default)]
struct CursorSlot {
    backlog: VecDeque<Outcome<Option<CursorHandle>>>,
    on_success: Option<CursorSuccessHandler>,
    on_error: Option<CursorErrorHandler>,
}

/// Request behind an open cursor. It settles once per positioning step: with
/// the cursor when a position is found, with `None` once exhausted.
#[derive(Clone)]
pub struct CursorRequest {
    slot: Arc<Mutex<CursorSlot>>,
    activity: Option<Activity>,
}

impl CursorRequest {
    pub(crate) fn new(activity: Option<Activity>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(CursorSlot::default())),
            activity,
        }
    }

    pub(crate) fn holder(&self) -> Option<Activity> {
        self.activity.clone()
    }

    pub fn on_success(&self, handler: impl FnMut(Option<CursorHandle>) + Send + 'static) {
        self.slot.lock().on_success = Some(Box::new(handler));
        self.dispatch();
    }

    pub fn on_error(&self, handler: impl FnMut(Option<IdbError>) + Send + 'static) {
        self.slot.lock().on_error = Some(Box::new(handler));
        self.dispatch();
    }

    pub(crate) fn fire(&self, outcome: Result<Option<CursorHandle>, IdbError>) {
        self.slot.lock().backlog.push_back(outcome.map_err(Some));
        self.dispatch();
    }

    /// Delivers backlogged events in order. Handlers run without the slot lock
    /// held so they may re-enter the request.
    fn dispatch(&self) {
        loop {
            let mut slot = self.slot.lock();
            match slot.backlog.pop_front() {
                Some(Ok(cursor)) => {
                    let Some(mut handler) = slot.on_success.take() else {
                        slot.backlog.push_front(Ok(cursor));
                        return;
                    };
                    drop(slot);
                    handler(cursor);
                    let mut slot = self.slot.lock();
                    if slot.on_success.is_none() {
                        slot.on_success = Some(handler);
                    }
                }
                Some(Err(error)) => {
                    let Some(mut handler) = slot.on_error.take() else {
                        slot.backlog.push_front(Err(error));
                        return;
                    };
                    drop(slot);
                    handler(error);
                    let mut slot = self.slot.lock();
                    if slot.on_error.is_none() {
                        slot.on_error = Some(handler);
                    }
                }
                None => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Request;
    use crate::error::{IdbError, IdbErrorCode};
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn outcome_waits_for_late_handler() {
        let (request, responder) = Request::<u32>::pair();
        responder.complete(Ok(7));
        assert!(request.is_settled());

        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        request.on_success(move |value| *sink.lock() = Some(value));
        assert_eq!(*seen.lock(), Some(7));
        assert!(!request.is_settled());
    }

    #[test]
    fn dropped_responder_fails_without_cause() {
        let (request, responder) = Request::<u32>::pair();
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        request.on_error(move |error| *sink.lock() = Some(error));
        drop(responder);
        assert!(matches!(*seen.lock(), Some(None)));
    }

    #[test]
    fn error_goes_only_to_error_handler() {
        let (request, responder) = Request::<u32>::pair();
        let successes = Arc::new(Mutex::new(0));
        let errors = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&successes);
        let e = Arc::clone(&errors);
        request.on_success(move |_| *s.lock() += 1);
        request.on_error(move |error: Option<IdbError>| e.lock().push(error.map(|e| e.code())));
        responder.complete(Err(IdbError::ReadOnly));
        assert_eq!(*successes.lock(), 0);
        assert_eq!(*errors.lock(), vec![Some(IdbErrorCode::ReadOnly)]);
    }
}
