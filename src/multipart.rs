//! Multipart negotiation.
//!
//! Compares the device's multi-component support with the configured
//! component list, enables the components, acquires, and puts the device back
//! in single-component mode.

use crate::acquisition::AcquisitionOutcome;
use crate::report::StepResult;
use crate::traits::DeviceSession;
use tracing::{debug, info, warn};

/// Step recorded when support does not match the expectation, or when no
/// multipart delivery is expected.
pub const STEP_NO_SUPPORT: &str = "NoSupport";
/// Step recorded for enabling multipart delivery.
pub const STEP_ENABLE: &str = "Enable";
/// Step recorded for the acquisition itself.
pub const STEP_BUFFER_CHECK: &str = "BufferCheck";

/// Negotiate multipart delivery of `components`, then run `acquire`.
///
/// `acquire` receives the session and the number of parts every buffer must
/// carry. The first component is restored as the only active one afterwards.
pub fn negotiate_and_run<D, F>(
    session: &mut D,
    components: &[String],
    acquire: F,
) -> Vec<StepResult>
where
    D: DeviceSession,
    F: FnOnce(&mut D, usize) -> AcquisitionOutcome,
{
    let expected = components.len() > 1;

    match session.is_multipart_supported() {
        Ok(supported) if !(expected && supported) => {
            debug!(supported, expected, "Multipart acquisition not attempted");
            return vec![StepResult::check(STEP_NO_SUPPORT, supported == expected, "")];
        }
        Ok(_) => {}
        Err(err) => {
            warn!(error = %err, "Multipart support query failed");
            return vec![StepResult::check(STEP_NO_SUPPORT, false, err.to_string())];
        }
    }

    let mut steps = Vec::with_capacity(2);

    if let Err(err) = session.set_multipart(true) {
        steps.push(StepResult::check(STEP_ENABLE, false, err.to_string()));
        return steps;
    }
    steps.push(StepResult::check(STEP_ENABLE, true, ""));

    let mut selection = Ok(());
    for (i, component) in components.iter().enumerate() {
        selection = session.select_and_enable_component(component, i == 0);
        if selection.is_err() {
            break;
        }
    }

    let outcome = match selection {
        Ok(()) => {
            info!(n_parts = components.len(), "Multipart acquisition");
            Some(acquire(session, components.len()))
        }
        Err(err) => {
            steps.push(StepResult::check(STEP_BUFFER_CHECK, false, err.to_string()));
            None
        }
    };

    let restored = session.set_multipart(false).and_then(|()| match components.first() {
        Some(first) => session.select_and_enable_component(first, true),
        None => Ok(()),
    });

    if let Some(outcome) = outcome {
        match restored {
            Ok(()) => steps.push(StepResult::check(
                STEP_BUFFER_CHECK,
                outcome.is_success(),
                outcome.to_string(),
            )),
            Err(err) => {
                warn!(error = %err, "Failed to restore single component delivery");
                steps.push(StepResult::check(STEP_BUFFER_CHECK, false, err.to_string()));
            }
        }
    }

    steps
}
