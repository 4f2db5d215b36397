pub mod analyser;
pub mod backend;
pub mod capture;
pub mod decode;
pub mod file;
pub mod output;
pub mod pipeline;
pub mod recorder;

pub use analyser::FrequencyAnalyser;
pub use backend::{AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioSource, AudioStreamSource};
pub use capture::{CaptureSignal, SyntheticBackend};
pub use decode::{decode_audio, DecodedAudio};
pub use file::AudioFile;
pub use output::{AudioOutput, NullOutput, WavOutput};
pub use pipeline::{AudioPipeline, AudioResources, VoiceListener};
pub use recorder::{RecordedTurn, TurnRecorder};
