//! Optimistic modify-and-apply.
//!
//! The caller's mutation runs against a working copy which is then submitted
//! with `replace`. When the server reports a conflict the object is re-fetched
//! and the mutation re-applied to the fresh state, up to the retry bound.
//! Only conflicts are retried: every other failure, remote or local, is
//! returned as-is.

use tracing::{debug, instrument, warn};

use crate::client::Client;
use crate::core::types::{FailureKind, RetryPolicy};
use crate::error::{Error, Result};
use crate::object::ApiObject;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The mutation reported no change, so nothing was submitted.
    Unchanged,
    /// Submitted successfully on attempt number `attempts`.
    Applied { attempts: u32 },
}

impl ApplyOutcome {
    pub fn is_applied(self) -> bool {
        matches!(self, ApplyOutcome::Applied { .. })
    }
}

/// Mutate and submit `target`, refreshing and retrying on conflict.
///
/// `mutate` is called once per attempt, each time on a fresh copy of the
/// latest known server state, and must return whether it changed anything.
/// On success `target` holds the state the server returned. When the first
/// attempt is a no-op `target` is untouched; a no-op after a refresh leaves
/// `target` at the refreshed state.
#[instrument(skip_all, fields(object = %target.qname(), max_attempts = policy.max_attempts))]
pub fn modify_and_apply<F>(
    client: &Client,
    target: &mut ApiObject,
    policy: RetryPolicy,
    mut mutate: F,
) -> Result<ApplyOutcome>
where
    F: FnMut(&mut ApiObject) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let reference = target.resource_ref()?;
    let namespace = target.namespace().map(str::to_string);
    let mut base = target.snapshot();
    let mut attempt = 1;

    loop {
        let mut working = base.snapshot();
        if !mutate(&mut working) {
            debug!(attempt, "mutation reported no change");
            if attempt > 1 {
                *target = base;
            }
            return Ok(ApplyOutcome::Unchanged);
        }

        match client.replace(&working) {
            Ok(stored) => {
                debug!(attempt, "applied");
                *target = stored;
                return Ok(ApplyOutcome::Applied { attempts: attempt });
            }
            Err(Error::Remote(failure)) if failure.kind == FailureKind::Conflict => {
                if attempt >= max_attempts {
                    warn!(attempts = attempt, "conflict on final attempt, giving up");
                    return Err(Error::RetriesExhausted {
                        attempts: attempt,
                        last: failure,
                    });
                }
                warn!(attempt, "conflict, refreshing");
                base = client.get_in(&reference, namespace.as_deref())?;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
