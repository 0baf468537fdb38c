//! Pod smoke test (C6, spec.md §4.6 "Smoke test"): before a provisioned pod
//! is allowed to accept real jobs it must transcribe 1s of silence. A failed
//! smoke test marks the setup state `failed` so the pod never appears as
//! `online` and never consumes real work.

use crate::errors::Result;
use crate::model::PodSetupPhase;
use crate::provisioner;

use diesel::pg::PgConnection;
use slog::Logger;

/// The narrow collaborator a provisioned pod's own process exposes for this
/// check -- kept behind a trait exactly like `AsrBackend`, so the real ASR
/// call and this lifecycle check share nothing but the trait boundary.
pub trait SilenceTranscriber: Send {
    fn transcribe_one_second_silence(&mut self) -> Result<()>;
}

/// Runs the smoke test for `instance_id` and records the outcome in its
/// `PodSetupState` (spec.md §4.6 step 4-5). On success advances the phase to
/// `registering` (the pod is expected to call the registration endpoint
/// next); on failure marks it `failed` with a structured error so it's
/// excluded from node claim eligibility.
pub fn run(
    log: &Logger,
    conn: &mut PgConnection,
    transcriber: &mut dyn SilenceTranscriber,
    instance_id: &str,
) -> Result<bool> {
    match transcriber.transcribe_one_second_silence() {
        Ok(()) => {
            provisioner::advance(conn, instance_id, PodSetupPhase::Registering, "smoke test passed")?;
            info!(log, "Pod smoke test passed"; "instance_id" => instance_id);
            Ok(true)
        }
        Err(e) => {
            provisioner::mark_failed(conn, instance_id, &format!("smoke test failed: {}", e))?;
            error!(log, "Pod smoke test failed"; "instance_id" => instance_id, "error" => e.to_string());
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;

    struct AlwaysOk;
    impl SilenceTranscriber for AlwaysOk {
        fn transcribe_one_second_silence(&mut self) -> Result<()> {
            Ok(())
        }
    }

    struct AlwaysFails;
    impl SilenceTranscriber for AlwaysFails {
        fn transcribe_one_second_silence(&mut self) -> Result<()> {
            Err(Error::Message("backend unreachable".to_owned()))
        }
    }

    #[test]
    fn test_silence_transcriber_trait_object_compiles() {
        let mut ok: Box<dyn SilenceTranscriber> = Box::new(AlwaysOk);
        assert!(ok.transcribe_one_second_silence().is_ok());
        let mut fails: Box<dyn SilenceTranscriber> = Box::new(AlwaysFails);
        assert!(fails.transcribe_one_second_silence().is_err());
    }
}
