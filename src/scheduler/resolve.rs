/*!
 * Context Resolution
 *
 * Decides, once per submission, which execution units a process joins.
 * Works from the capabilities captured when the payload was installed.
 */

use crate::core::errors::{SchedulerError, SchedulerResult};
use crate::core::types::{Context, ContextMask};
use crate::process::{PayloadKind, PayloadProfile, ProcessFlags};

/// Context a process runs in when nothing narrows it down
pub const DEFAULT_CONTEXT: Context = Context::Update;

/// Resolve the context mask for a submission
///
/// - a task declares its contexts; an explicit request must be a subset
/// - a callback or job-only process runs where it was asked, else `Update`
/// - `deferred` moves `Update` work onto the time-sliced `Async` unit
pub fn resolve_contexts(
    requested: ContextMask,
    profile: PayloadProfile,
    has_job: bool,
    flags: ProcessFlags,
) -> SchedulerResult<ContextMask> {
    if profile.kind == PayloadKind::Empty && !has_job {
        return Err(SchedulerError::EmptyPayload);
    }

    let mask = match profile.declared {
        Some(declared) if requested.is_empty() => declared,
        Some(declared) => {
            if let Some(context) = requested.iter().find(|c| !declared.contains(*c)) {
                return Err(SchedulerError::UnsupportedContext {
                    context,
                    supported: declared,
                });
            }
            requested
        }
        None if requested.is_empty() => ContextMask::single(DEFAULT_CONTEXT),
        None => requested,
    };

    if mask.is_empty() {
        return Err(SchedulerError::EmptyContextMask);
    }

    if flags.deferred && mask.contains(Context::Update) {
        return Ok(mask.without(Context::Update).with(Context::Async));
    }
    Ok(mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{Payload, Poll, Task, Tick};

    struct Declares(ContextMask);

    impl Task for Declares {
        fn contexts(&self) -> ContextMask {
            self.0
        }

        fn poll(&mut self, _tick: &Tick) -> Poll {
            Poll::Done
        }
    }

    fn flags() -> ProcessFlags {
        ProcessFlags::new()
    }

    #[test]
    fn test_task_declares_contexts() {
        let payload = Payload::task(Declares(Context::Update | Context::Thread));
        let mask = resolve_contexts(ContextMask::EMPTY, payload.profile(), false, flags()).unwrap();
        assert_eq!(mask, Context::Update | Context::Thread);
    }

    #[test]
    fn test_request_must_be_supported() {
        let payload = Payload::task(Declares(ContextMask::single(Context::FixedUpdate)));
        let err = resolve_contexts(
            ContextMask::single(Context::Thread),
            payload.profile(),
            false,
            flags(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            SchedulerError::UnsupportedContext {
                context: Context::Thread,
                supported: ContextMask::single(Context::FixedUpdate),
            }
        );
    }

    #[test]
    fn test_request_narrows_declared() {
        let payload = Payload::task(Declares(Context::Update | Context::LateUpdate));
        let mask = resolve_contexts(
            ContextMask::single(Context::LateUpdate),
            payload.profile(),
            false,
            flags(),
        )
        .unwrap();
        assert_eq!(mask, ContextMask::single(Context::LateUpdate));
    }

    #[test]
    fn test_empty_declaration_rejected() {
        let payload = Payload::task(Declares(ContextMask::EMPTY));
        assert_eq!(
            resolve_contexts(ContextMask::EMPTY, payload.profile(), false, flags()),
            Err(SchedulerError::EmptyContextMask)
        );
    }

    #[test]
    fn test_callback_and_job_default_to_update() {
        let callback = Payload::callback(|_| Poll::Done);
        assert_eq!(
            resolve_contexts(ContextMask::EMPTY, callback.profile(), false, flags()).unwrap(),
            ContextMask::single(Context::Update)
        );
        assert_eq!(
            resolve_contexts(ContextMask::EMPTY, Payload::Empty.profile(), true, flags()).unwrap(),
            ContextMask::single(Context::Update)
        );
        assert_eq!(
            resolve_contexts(
                ContextMask::single(Context::Editor),
                callback.profile(),
                false,
                flags()
            )
            .unwrap(),
            ContextMask::single(Context::Editor)
        );
    }

    #[test]
    fn test_empty_payload_rejected() {
        assert_eq!(
            resolve_contexts(ContextMask::EMPTY, Payload::Empty.profile(), false, flags()),
            Err(SchedulerError::EmptyPayload)
        );
    }

    #[test]
    fn test_deferred_reroutes_update() {
        let deferred = ProcessFlags {
            deferred: true,
            ..ProcessFlags::new()
        };
        let callback = Payload::callback(|_| Poll::Done);
        let mask = resolve_contexts(
            Context::Update | Context::FixedUpdate,
            callback.profile(),
            false,
            deferred,
        )
        .unwrap();
        assert_eq!(mask, Context::Async | Context::FixedUpdate);
    }
}
