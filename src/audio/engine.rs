use crate::audio::output::{AudioBackend, AudioContext, ContextState};
use crate::audio::tone::{render, severity_pattern, system_pattern, Tone};
use crate::config::AudioConfig;
use crate::models::Severity;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct EngineState {
    context: Option<Box<dyn AudioContext>>,
    init_attempted: bool,
    /// Set while a suspended context is waiting for the first user gesture
    resume_hook: bool,
    disposed: bool,
}

/// Plays severity cues. Audio failures are logged and never reach the caller.
pub struct ToneEngine {
    backend: Arc<dyn AudioBackend>,
    sample_rate: u32,
    enabled: AtomicBool,
    state: Mutex<EngineState>,
}

impl ToneEngine {
    pub fn new(backend: Arc<dyn AudioBackend>, config: &AudioConfig) -> Self {
        Self {
            backend,
            sample_rate: config.sample_rate,
            enabled: AtomicBool::new(config.enabled),
            state: Mutex::new(EngineState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Create the audio context if that has not been tried yet
    pub fn init(&self) {
        let mut state = self.lock();
        self.ensure_context(&mut state);
    }

    fn ensure_context(&self, state: &mut EngineState) {
        if state.init_attempted || state.disposed {
            return;
        }
        state.init_attempted = true;

        match self.backend.create_context(self.sample_rate) {
            Ok(context) => {
                if context.state() == ContextState::Suspended {
                    debug!("Audio context suspended until first user gesture");
                    state.resume_hook = true;
                }
                info!("Audio context ready at {} Hz", context.sample_rate());
                state.context = Some(context);
            }
            Err(e) => warn!("Audio unavailable, cues disabled: {}", e),
        }
    }

    /// First click/touch: resume a suspended context. The hook is removed once a resume succeeds.
    pub fn notify_user_gesture(&self) {
        let mut state = self.lock();
        if !state.resume_hook {
            return;
        }

        let Some(context) = state.context.as_mut() else {
            state.resume_hook = false;
            return;
        };

        if context.state() == ContextState::Suspended {
            if let Err(e) = context.resume() {
                warn!("Failed to resume audio context: {}", e);
                return;
            }
        }
        state.resume_hook = false;
        debug!("Audio context resumed after user gesture");
    }

    pub fn has_resume_hook(&self) -> bool {
        self.lock().resume_hook
    }

    pub fn is_available(&self) -> bool {
        self.lock().context.is_some()
    }

    pub fn play_cue(&self, severity: Severity) {
        self.play_pattern(severity_pattern(severity), &severity.to_string());
    }

    /// Short chime for operational events, unrelated to severity
    pub fn play_system_cue(&self) {
        self.play_pattern(system_pattern(), "system");
    }

    fn play_pattern(&self, tones: &[Tone], label: &str) {
        if !self.is_enabled() {
            return;
        }

        let mut state = self.lock();
        self.ensure_context(&mut state);
        let Some(context) = state.context.as_mut() else {
            return;
        };

        match context.state() {
            ContextState::Closed => return,
            ContextState::Suspended => {
                if let Err(e) = context.resume() {
                    debug!("Audio context still suspended, skipping {} cue: {}", label, e);
                    return;
                }
            }
            ContextState::Running => {}
        }

        let samples = render(tones, context.sample_rate());
        if let Err(e) = context.play(samples) {
            warn!("Failed to play {} cue: {}", label, e);
        }
    }

    /// Global mute switch
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Close the context. Later cues are no-ops.
    pub fn dispose(&self) {
        let mut state = self.lock();
        if let Some(mut context) = state.context.take() {
            context.close();
            info!("Audio context closed");
        }
        state.resume_hook = false;
        state.disposed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::output::NullBackend;
    use crate::error::Error;
    use anyhow::Result;

    #[derive(Default)]
    struct Log {
        created: usize,
        resumes: usize,
        played: Vec<usize>,
        closed: bool,
    }

    struct FakeBackend {
        log: Arc<Mutex<Log>>,
        initial: ContextState,
        fail_resume: Arc<AtomicBool>,
    }

    struct FakeContext {
        log: Arc<Mutex<Log>>,
        state: ContextState,
        fail_resume: Arc<AtomicBool>,
    }

    impl AudioBackend for FakeBackend {
        fn create_context(&self, _preferred_sample_rate: u32) -> Result<Box<dyn AudioContext>> {
            self.log.lock().unwrap().created += 1;
            Ok(Box::new(FakeContext {
                log: self.log.clone(),
                state: self.initial,
                fail_resume: self.fail_resume.clone(),
            }))
        }
    }

    impl AudioContext for FakeContext {
        fn state(&self) -> ContextState {
            self.state
        }

        fn sample_rate(&self) -> u32 {
            1000
        }

        fn resume(&mut self) -> Result<()> {
            self.log.lock().unwrap().resumes += 1;
            if self.fail_resume.load(Ordering::SeqCst) {
                return Err(Error::Audio("blocked by autoplay policy".into()).into());
            }
            self.state = ContextState::Running;
            Ok(())
        }

        fn play(&mut self, samples: Vec<f32>) -> Result<()> {
            self.log.lock().unwrap().played.push(samples.len());
            Ok(())
        }

        fn close(&mut self) {
            self.state = ContextState::Closed;
            self.log.lock().unwrap().closed = true;
        }
    }

    fn engine(initial: ContextState) -> (ToneEngine, Arc<Mutex<Log>>, Arc<AtomicBool>) {
        let log = Arc::new(Mutex::new(Log::default()));
        let fail_resume = Arc::new(AtomicBool::new(false));
        let backend = FakeBackend {
            log: log.clone(),
            initial,
            fail_resume: fail_resume.clone(),
        };
        (
            ToneEngine::new(Arc::new(backend), &AudioConfig::default()),
            log,
            fail_resume,
        )
    }

    #[test]
    fn context_is_created_lazily_once() {
        let (engine, log, _) = engine(ContextState::Running);
        assert_eq!(log.lock().unwrap().created, 0);

        engine.play_cue(Severity::Info);
        engine.play_cue(Severity::Critical);
        engine.play_system_cue();

        let log = log.lock().unwrap();
        assert_eq!(log.created, 1);
        assert_eq!(log.played.len(), 3);
        // Critical is the longest pattern
        assert!(log.played[1] > log.played[0]);
        assert!(log.played[2] < log.played[0]);
    }

    #[test]
    fn muted_engine_does_nothing() {
        let (engine, log, _) = engine(ContextState::Running);
        engine.set_enabled(false);
        assert!(!engine.is_enabled());

        engine.play_cue(Severity::Critical);
        engine.play_system_cue();
        assert_eq!(log.lock().unwrap().created, 0);

        engine.set_enabled(true);
        engine.play_cue(Severity::Warning);
        assert_eq!(log.lock().unwrap().played.len(), 1);
    }

    #[test]
    fn unavailable_audio_is_silent() {
        let engine = ToneEngine::new(Arc::new(NullBackend), &AudioConfig::default());
        engine.init();
        engine.play_cue(Severity::Critical);
        engine.notify_user_gesture();
        assert!(!engine.is_available());
        engine.dispose();
    }

    #[test]
    fn resume_hook_is_removed_after_successful_resume() {
        let (engine, log, fail_resume) = engine(ContextState::Suspended);
        engine.init();
        assert!(engine.has_resume_hook());

        fail_resume.store(true, Ordering::SeqCst);
        engine.notify_user_gesture();
        assert!(engine.has_resume_hook());

        fail_resume.store(false, Ordering::SeqCst);
        engine.notify_user_gesture();
        assert!(!engine.has_resume_hook());

        engine.notify_user_gesture();
        assert_eq!(log.lock().unwrap().resumes, 2);
    }

    #[test]
    fn suspended_context_that_cannot_resume_skips_the_cue() {
        let (engine, log, fail_resume) = engine(ContextState::Suspended);
        fail_resume.store(true, Ordering::SeqCst);

        engine.play_cue(Severity::Critical);
        assert!(log.lock().unwrap().played.is_empty());
    }

    #[test]
    fn dispose_closes_and_silences() {
        let (engine, log, _) = engine(ContextState::Running);
        engine.play_cue(Severity::Info);
        engine.dispose();
        assert!(log.lock().unwrap().closed);

        engine.play_cue(Severity::Critical);
        let log = log.lock().unwrap();
        assert_eq!(log.created, 1);
        assert_eq!(log.played.len(), 1);
    }
}
