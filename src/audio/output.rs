use crate::error::Error;
use anyhow::Result;
use std::sync::Arc;

/// Lifecycle of an audio context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Created but not allowed to produce sound yet
    Suspended,
    Running,
    Closed,
}

/// An open audio output
pub trait AudioContext: Send {
    fn state(&self) -> ContextState;

    fn sample_rate(&self) -> u32;

    fn resume(&mut self) -> Result<()>;

    /// Queue mono samples for playback. Must not block until they finish.
    fn play(&mut self, samples: Vec<f32>) -> Result<()>;

    fn close(&mut self);
}

/// Creates audio contexts
pub trait AudioBackend: Send + Sync {
    fn create_context(&self, preferred_sample_rate: u32) -> Result<Box<dyn AudioContext>>;
}

/// Backend for hosts without an audio device
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBackend;

impl AudioBackend for NullBackend {
    fn create_context(&self, _preferred_sample_rate: u32) -> Result<Box<dyn AudioContext>> {
        Err(Error::Audio("No audio output available".to_string()).into())
    }
}

/// Speaker output when built with the `speaker` feature, otherwise silence
pub fn default_backend() -> Arc<dyn AudioBackend> {
    #[cfg(feature = "speaker")]
    {
        Arc::new(speaker::SpeakerBackend)
    }
    #[cfg(not(feature = "speaker"))]
    {
        Arc::new(NullBackend)
    }
}

#[cfg(feature = "speaker")]
pub mod speaker {
    use super::{AudioBackend, AudioContext, ContextState};
    use crate::error::Error;
    use anyhow::Result;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::SampleFormat;
    use log::{error, info};
    use std::collections::VecDeque;
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};
    use std::thread;

    /// Default output device through cpal
    #[derive(Debug, Default, Clone, Copy)]
    pub struct SpeakerBackend;

    impl AudioBackend for SpeakerBackend {
        fn create_context(&self, _preferred_sample_rate: u32) -> Result<Box<dyn AudioContext>> {
            Ok(Box::new(SpeakerContext::open()?))
        }
    }

    enum Control {
        Play,
        Pause,
        Close,
    }

    /// The cpal stream lives on its own thread; this handle talks to it
    pub struct SpeakerContext {
        queue: Arc<Mutex<VecDeque<f32>>>,
        control: mpsc::Sender<Control>,
        sample_rate: u32,
        state: ContextState,
    }

    impl SpeakerContext {
        fn open() -> Result<Self> {
            let queue = Arc::new(Mutex::new(VecDeque::new()));
            let (control_tx, control_rx) = mpsc::channel::<Control>();
            let (ready_tx, ready_rx) = mpsc::channel::<std::result::Result<u32, String>>();
            let stream_queue = queue.clone();

            thread::Builder::new()
                .name("tone-output".to_string())
                .spawn(move || run_stream(stream_queue, control_rx, ready_tx))
                .map_err(|e| Error::Audio(format!("Failed to spawn audio thread: {}", e)))?;

            let sample_rate = ready_rx
                .recv()
                .map_err(|_| Error::Audio("Audio thread exited during startup".to_string()))?
                .map_err(Error::Audio)?;

            Ok(Self {
                queue,
                control: control_tx,
                sample_rate,
                state: ContextState::Running,
            })
        }
    }

    fn run_stream(
        queue: Arc<Mutex<VecDeque<f32>>>,
        control: mpsc::Receiver<Control>,
        ready: mpsc::Sender<std::result::Result<u32, String>>,
    ) {
        let host = cpal::default_host();
        let Some(device) = host.default_output_device() else {
            let _ = ready.send(Err("No default output device found".to_string()));
            return;
        };

        let supported = match device.default_output_config() {
            Ok(config) => config,
            Err(e) => {
                let _ = ready.send(Err(format!("Failed to get default config: {}", e)));
                return;
            }
        };
        if supported.sample_format() != SampleFormat::F32 {
            let _ = ready.send(Err(format!(
                "Unsupported sample format: {:?}",
                supported.sample_format()
            )));
            return;
        }

        let config = supported.config();
        let channels = config.channels as usize;
        let sample_rate = config.sample_rate.0;

        let stream = device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut queue = match queue.lock() {
                    Ok(queue) => queue,
                    Err(poisoned) => poisoned.into_inner(),
                };
                for frame in data.chunks_mut(channels) {
                    let sample = queue.pop_front().unwrap_or(0.0);
                    frame.fill(sample);
                }
            },
            |err| error!("Audio stream error: {}", err),
            None,
        );

        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                let _ = ready.send(Err(format!("Failed to build stream: {}", e)));
                return;
            }
        };
        if let Err(e) = stream.play() {
            let _ = ready.send(Err(format!("Failed to start stream: {}", e)));
            return;
        }

        info!("Audio output running at {} Hz", sample_rate);
        if ready.send(Ok(sample_rate)).is_err() {
            return;
        }

        while let Ok(message) = control.recv() {
            let result = match message {
                Control::Play => stream.play().map_err(|e| e.to_string()),
                Control::Pause => stream.pause().map_err(|e| e.to_string()),
                Control::Close => break,
            };
            if let Err(e) = result {
                error!("Audio stream control failed: {}", e);
            }
        }
    }

    impl AudioContext for SpeakerContext {
        fn state(&self) -> ContextState {
            self.state
        }

        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }

        fn resume(&mut self) -> Result<()> {
            if self.state == ContextState::Closed {
                return Err(Error::Audio("Audio context is closed".to_string()).into());
            }
            self.control
                .send(Control::Play)
                .map_err(|_| Error::Audio("Audio thread is gone".to_string()))?;
            self.state = ContextState::Running;
            Ok(())
        }

        fn play(&mut self, samples: Vec<f32>) -> Result<()> {
            let mut queue = self
                .queue
                .lock()
                .map_err(|_| Error::Audio("Audio queue poisoned".to_string()))?;
            queue.extend(samples);
            Ok(())
        }

        fn close(&mut self) {
            if self.state != ContextState::Closed {
                let _ = self.control.send(Control::Pause);
                let _ = self.control.send(Control::Close);
                self.state = ContextState::Closed;
            }
        }
    }

    impl Drop for SpeakerContext {
        fn drop(&mut self) {
            self.close();
        }
    }
}
