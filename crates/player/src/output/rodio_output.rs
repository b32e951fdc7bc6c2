use std::io::Cursor;
use std::time::Duration;

use common::Track;
use rodio::mixer::Mixer;
use rodio::{Decoder, OutputStream, OutputStreamBuilder, Sink, Source};
use tracing::debug;

use super::{AudioOutput, OutputError};

/// Output on the default audio device. Each load decodes the stored payload
/// into a fresh sink that starts paused.
pub struct RodioOutput {
    _stream: OutputStream,
    mixer: Mixer,
    sink: Option<Sink>,
    duration: Option<Duration>,
    volume: f32,
}

impl RodioOutput {
    pub fn open_default() -> Result<Self, OutputError> {
        let stream = OutputStreamBuilder::open_default_stream()
            .map_err(|err| OutputError::Device(err.to_string()))?;
        let mixer = stream.mixer().clone();
        Ok(Self {
            _stream: stream,
            mixer,
            sink: None,
            duration: None,
            volume: 1.0,
        })
    }
}

impl AudioOutput for RodioOutput {
    fn load(&mut self, track: &Track) -> Result<(), OutputError> {
        self.stop();
        let source = Decoder::new(Cursor::new(track.data.clone()))
            .map_err(|err| OutputError::Decode(format!("{}: {}", track.file_name, err)))?;
        self.duration = source.total_duration().filter(|duration| !duration.is_zero());

        let sink = Sink::connect_new(&self.mixer);
        sink.append(source);
        sink.set_volume(self.volume);
        sink.pause();
        self.sink = Some(sink);
        debug!("Loaded {} into output", track.file_name);
        Ok(())
    }

    fn play(&mut self) -> Result<(), OutputError> {
        let sink = self.sink.as_ref().ok_or(OutputError::NotLoaded)?;
        sink.play();
        Ok(())
    }

    fn pause(&mut self) {
        if let Some(sink) = &self.sink {
            sink.pause();
        }
    }

    fn stop(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
        self.duration = None;
    }

    fn seek(&mut self, position: Duration) -> Result<(), OutputError> {
        let sink = self.sink.as_ref().ok_or(OutputError::NotLoaded)?;
        sink.try_seek(position)
            .map_err(|err| OutputError::Seek(err.to_string()))
    }

    fn position(&self) -> Duration {
        self.sink
            .as_ref()
            .map(|sink| sink.get_pos())
            .unwrap_or(Duration::ZERO)
    }

    fn duration(&self) -> Option<Duration> {
        self.duration
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
        if let Some(sink) = &self.sink {
            sink.set_volume(volume);
        }
    }

    fn is_finished(&self) -> bool {
        self.sink.as_ref().map(|sink| sink.empty()).unwrap_or(false)
    }
}
