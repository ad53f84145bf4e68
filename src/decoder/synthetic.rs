//! Synthetic media backend
//!
//! Generates a test-pattern video track and a sine-tone audio track as
//! compressed chunks, and decodes them with pass-through decode units that
//! run on their own tokio task with a configurable latency. Used by the demo
//! binary and by tests; it honours every contract a real demuxer/decoder
//! pair has to.

use crate::decoder::{
    AudioData, AudioTrackInfo, ChunkStream, CompressedChunk, DecodeUnit, DecodedAudioBlock,
    DecodedVideoFrame, DecoderCallbacks, DecoderConfig, DecoderState, FramePool, FrameRate,
    MediaBackend, MediaInfo, SampleLayout, SeekMode, TrackKind, VideoTrackInfo,
};
use crate::utils::error::{Result, SyncError};
use crate::utils::secs_to_micros;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const VIDEO_MAGIC: &[u8; 4] = b"SYNV";
const AUDIO_MAGIC: &[u8; 4] = b"SYNA";
const VIDEO_PAYLOAD_LEN: usize = 4 + 8 + 4 + 4;
const AUDIO_PAYLOAD_LEN: usize = 4 + 8 + 4;

/// Shape of the generated media
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    /// Name reported in media info
    pub source: String,

    /// Length of both tracks
    pub duration: Duration,

    /// Video frame rate
    pub frame_rate: FrameRate,

    /// Video frame size
    pub width: u32,
    pub height: u32,

    /// Frames between key frames
    pub gop_size: u64,

    /// Audio format
    pub sample_rate: u32,
    pub channels: u16,

    /// Frames per decoded audio block
    pub audio_block_frames: usize,

    /// Layout the audio decoder emits
    pub audio_layout: SampleLayout,

    /// Frequency of the generated tone
    pub tone_hz: f32,

    /// Time each decode unit spends per chunk
    pub decode_latency: Duration,

    /// Chunks buffered ahead by each read
    pub read_ahead: usize,

    /// Whether the source exposes each track
    pub include_video: bool,
    pub include_audio: bool,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            source: "synthetic://test-pattern".to_string(),
            duration: Duration::from_secs(30),
            frame_rate: FrameRate { numerator: 30, denominator: 1 },
            width: 160,
            height: 90,
            gop_size: 30,
            sample_rate: 48_000,
            channels: 2,
            audio_block_frames: 1024,
            audio_layout: SampleLayout::S16Interleaved,
            tone_hz: 440.0,
            decode_latency: Duration::from_millis(1),
            read_ahead: 8,
            include_video: true,
            include_audio: true,
        }
    }
}

/// Backend producing and decoding synthetic media
pub struct SyntheticMedia {
    config: SyntheticConfig,
    pool: FramePool,
    streams_opened: AtomicUsize,
    decoders_created: AtomicUsize,
}

impl SyntheticMedia {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            pool: FramePool::new(),
            streams_opened: AtomicUsize::new(0),
            decoders_created: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &SyntheticConfig {
        &self.config
    }

    /// Pool tracking every frame the video decoders hand out
    pub fn frame_pool(&self) -> &FramePool {
        &self.pool
    }

    /// Chunk streams opened so far, both tracks
    pub fn streams_opened(&self) -> usize {
        self.streams_opened.load(Ordering::Acquire)
    }

    /// Decode units created so far, both tracks
    pub fn decoders_created(&self) -> usize {
        self.decoders_created.load(Ordering::Acquire)
    }

    fn total_video_frames(&self) -> u64 {
        self.config.frame_rate.index_at(self.config.duration.as_secs_f64())
    }

    fn total_audio_frames(&self) -> u64 {
        (self.config.duration.as_secs_f64() * f64::from(self.config.sample_rate)) as u64
    }

    fn video_chunks(&self, start: f64, end: f64, mode: SeekMode) -> impl Iterator<Item = CompressedChunk> {
        let rate = self.config.frame_rate;
        let (width, height) = (self.config.width, self.config.height);
        let mut first = rate.index_at(start);
        if mode == SeekMode::Keyframe {
            first -= first % self.config.gop_size.max(1);
        }
        let total = self.total_video_frames();
        let last = if end > 0.0 { rate.index_at(end).min(total) } else { total };
        let gop = self.config.gop_size.max(1);
        let duration = secs_to_micros(rate.period());

        (first..last).enumerate().map(move |(sequence, index)| CompressedChunk {
            track: TrackKind::Video,
            sequence: sequence as u64,
            pts: secs_to_micros(rate.frame_time(index)),
            duration,
            key: index % gop == 0,
            payload: encode_video_payload(index, width, height),
        })
    }

    fn audio_chunks(&self, start: f64, end: f64) -> impl Iterator<Item = CompressedChunk> {
        let sample_rate = u64::from(self.config.sample_rate.max(1));
        let block = self.config.audio_block_frames.max(1) as u64;
        let total = self.total_audio_frames();
        let last = if end > 0.0 { ((end * sample_rate as f64) as u64).min(total) } else { total };
        let first = ((start.max(0.0) * sample_rate as f64) as u64 / block) * block;

        let mut sequence = 0u64;
        let mut cursor = first;
        std::iter::from_fn(move || {
            if cursor >= last {
                return None;
            }
            let frames = block.min(last - cursor);
            let chunk = CompressedChunk {
                track: TrackKind::Audio,
                sequence,
                pts: (cursor * 1_000_000 / sample_rate) as i64,
                duration: (frames * 1_000_000 / sample_rate) as i64,
                key: true,
                payload: encode_audio_payload(cursor, frames as u32),
            };
            sequence += 1;
            cursor += frames;
            Some(chunk)
        })
    }
}

impl MediaBackend for SyntheticMedia {
    fn media_info(&self) -> Result<MediaInfo> {
        let video = self.config.include_video.then(|| VideoTrackInfo {
            codec: "synthetic-rgba".to_string(),
            width: self.config.width,
            height: self.config.height,
            frame_rate: self.config.frame_rate,
            extradata: Vec::new(),
        });
        let audio = self.config.include_audio.then(|| AudioTrackInfo {
            codec: "synthetic-pcm".to_string(),
            sample_rate: self.config.sample_rate,
            channels: self.config.channels,
            extradata: Vec::new(),
        });

        Ok(MediaInfo {
            source: self.config.source.clone(),
            duration: self.config.duration,
            start_time: 0.0,
            video,
            audio,
        })
    }

    fn read(&self, track: TrackKind, start: f64, end: f64, mode: SeekMode) -> Result<ChunkStream> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| SyncError::not_ready("chunk source requires a tokio runtime"))?;

        let chunks: Box<dyn Iterator<Item = CompressedChunk> + Send> = match track {
            TrackKind::Video if self.config.include_video => Box::new(self.video_chunks(start, end, mode)),
            TrackKind::Audio if self.config.include_audio => Box::new(self.audio_chunks(start, end)),
            _ => return Err(SyncError::Configuration(format!("{} has no {} track", self.config.source, track))),
        };

        self.streams_opened.fetch_add(1, Ordering::AcqRel);
        log::debug!("Opening {} stream at {:.3}s ({:?})", track, start, mode);
        let (sender, mut stream) = ChunkStream::channel(track, self.config.read_ahead);
        let producer = runtime.spawn(async move {
            for chunk in chunks {
                if !sender.send(chunk).await {
                    break;
                }
            }
        });
        stream.attach_producer(producer);
        Ok(stream)
    }

    fn create_video_decoder(&self, callbacks: DecoderCallbacks<DecodedVideoFrame>) -> Result<Box<dyn DecodeUnit>> {
        self.decoders_created.fetch_add(1, Ordering::AcqRel);
        let pool = self.pool.clone();
        let codec = move |chunk: &CompressedChunk| -> Result<DecodedVideoFrame> {
            let (index, width, height) = parse_video_payload(&chunk.payload)?;
            Ok(DecodedVideoFrame::new(
                chunk.pts,
                chunk.duration,
                width,
                height,
                test_pattern(index, width, height),
                pool.lease(),
            ))
        };
        Ok(Box::new(SyntheticDecoder::new(
            TrackKind::Video,
            Arc::new(codec),
            Arc::new(|chunk: &CompressedChunk| parse_video_payload(&chunk.payload).map(|_| ())),
            callbacks,
            self.config.decode_latency,
        )))
    }

    fn create_audio_decoder(&self, callbacks: DecoderCallbacks<DecodedAudioBlock>) -> Result<Box<dyn DecodeUnit>> {
        self.decoders_created.fetch_add(1, Ordering::AcqRel);
        let sample_rate = self.config.sample_rate;
        let channels = usize::from(self.config.channels);
        let layout = self.config.audio_layout;
        let tone_hz = self.config.tone_hz;
        let codec = move |chunk: &CompressedChunk| -> Result<DecodedAudioBlock> {
            let (first_sample, frames) = parse_audio_payload(&chunk.payload)?;
            let data = synthesize_tone(first_sample, frames, channels, sample_rate, tone_hz, layout);
            DecodedAudioBlock::new(chunk.pts, sample_rate, channels, frames, layout, data)
        };
        Ok(Box::new(SyntheticDecoder::new(
            TrackKind::Audio,
            Arc::new(codec),
            Arc::new(|chunk: &CompressedChunk| parse_audio_payload(&chunk.payload).map(|_| ())),
            callbacks,
            self.config.decode_latency,
        )))
    }
}

type Codec<T> = Arc<dyn Fn(&CompressedChunk) -> Result<T> + Send + Sync>;
type Validator = Arc<dyn Fn(&CompressedChunk) -> Result<()> + Send + Sync>;

/// Pass-through decode unit with its own worker task
struct SyntheticDecoder<T> {
    track: TrackKind,
    state: DecoderState,
    pending: Arc<AtomicUsize>,
    tx: Option<mpsc::UnboundedSender<CompressedChunk>>,
    worker: Option<JoinHandle<()>>,
    codec: Codec<T>,
    validate: Validator,
    callbacks: DecoderCallbacks<T>,
    latency: Duration,
}

impl<T: Send + 'static> SyntheticDecoder<T> {
    fn new(track: TrackKind, codec: Codec<T>, validate: Validator, callbacks: DecoderCallbacks<T>, latency: Duration) -> Self {
        Self {
            track,
            state: DecoderState::Unconfigured,
            pending: Arc::new(AtomicUsize::new(0)),
            tx: None,
            worker: None,
            codec,
            validate,
            callbacks,
            latency,
        }
    }

    fn spawn_worker(&mut self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| SyncError::not_ready("decoder requires a tokio runtime"))?;

        let (tx, mut rx) = mpsc::unbounded_channel::<CompressedChunk>();
        let pending = self.pending.clone();
        let codec = self.codec.clone();
        let output = self.callbacks.output.clone();
        let errors = self.callbacks.error.clone();
        let latency = self.latency;
        let component = match self.track {
            TrackKind::Video => "synthetic-video-decoder",
            TrackKind::Audio => "synthetic-audio-decoder",
        };

        let worker = runtime.spawn(async move {
            while let Some(chunk) = rx.recv().await {
                if !latency.is_zero() {
                    tokio::time::sleep(latency).await;
                }
                // Leaves the decode queue before its output is delivered
                pending.fetch_sub(1, Ordering::AcqRel);
                match codec(&chunk) {
                    Ok(unit) => output(unit),
                    Err(e) => errors.report(component, &e),
                }
            }
        });

        self.tx = Some(tx);
        self.worker = Some(worker);
        Ok(())
    }
}

impl<T: Send + 'static> DecodeUnit for SyntheticDecoder<T> {
    fn configure(&mut self, config: &DecoderConfig) -> Result<()> {
        match self.state {
            DecoderState::Closed => return Err(SyncError::not_ready("decoder is closed")),
            DecoderState::Configured => return Ok(()),
            DecoderState::Unconfigured => {}
        }
        if config.track() != self.track {
            return Err(SyncError::Configuration(format!(
                "{} decoder cannot take a {} configuration",
                self.track,
                config.track()
            )));
        }
        self.spawn_worker()?;
        self.state = DecoderState::Configured;
        Ok(())
    }

    fn decode(&mut self, chunk: CompressedChunk) -> Result<()> {
        if self.state != DecoderState::Configured {
            return Err(SyncError::not_ready(format!("{} decoder is {:?}", self.track, self.state)));
        }
        (self.validate)(&chunk)?;

        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| SyncError::not_ready("decoder worker is gone"))?;
        self.pending.fetch_add(1, Ordering::AcqRel);
        if tx.send(chunk).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(SyncError::not_ready("decoder worker stopped"));
        }
        Ok(())
    }

    fn decode_queue_size(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    fn state(&self) -> DecoderState {
        self.state
    }

    fn close(&mut self) {
        self.state = DecoderState::Closed;
        self.tx = None;
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
        self.pending.store(0, Ordering::Release);
    }
}

impl<T> Drop for SyntheticDecoder<T> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

/// Encode a video chunk payload for frame `index`
pub fn encode_video_payload(index: u64, width: u32, height: u32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(VIDEO_PAYLOAD_LEN);
    payload.extend_from_slice(VIDEO_MAGIC);
    payload.extend_from_slice(&index.to_le_bytes());
    payload.extend_from_slice(&width.to_le_bytes());
    payload.extend_from_slice(&height.to_le_bytes());
    payload
}

fn encode_audio_payload(first_sample: u64, frames: u32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(AUDIO_PAYLOAD_LEN);
    payload.extend_from_slice(AUDIO_MAGIC);
    payload.extend_from_slice(&first_sample.to_le_bytes());
    payload.extend_from_slice(&frames.to_le_bytes());
    payload
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(raw)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(raw)
}

fn parse_video_payload(payload: &[u8]) -> Result<(u64, u32, u32)> {
    if payload.len() != VIDEO_PAYLOAD_LEN || &payload[..4] != VIDEO_MAGIC {
        return Err(SyncError::decode_error(format!("malformed video chunk ({} bytes)", payload.len())));
    }
    let index = read_u64(&payload[4..12]);
    let width = read_u32(&payload[12..16]);
    let height = read_u32(&payload[16..20]);
    if width == 0 || height == 0 {
        return Err(SyncError::decode_error("video chunk with empty frame size"));
    }
    Ok((index, width, height))
}

fn parse_audio_payload(payload: &[u8]) -> Result<(u64, usize)> {
    if payload.len() != AUDIO_PAYLOAD_LEN || &payload[..4] != AUDIO_MAGIC {
        return Err(SyncError::decode_error(format!("malformed audio chunk ({} bytes)", payload.len())));
    }
    Ok((read_u64(&payload[4..12]), read_u32(&payload[12..16]) as usize))
}

/// RGBA frame whose colour encodes the frame index
fn test_pattern(index: u64, width: u32, height: u32) -> Vec<u8> {
    let shade = (index % 256) as u8;
    let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
    for y in 0..height {
        let row = (y * 255 / height.max(1)) as u8;
        for _ in 0..width {
            pixels.extend_from_slice(&[shade, row, 255 - shade, 255]);
        }
    }
    pixels
}

fn synthesize_tone(
    first_sample: u64,
    frames: usize,
    channels: usize,
    sample_rate: u32,
    tone_hz: f32,
    layout: SampleLayout,
) -> AudioData {
    let step = 2.0 * std::f64::consts::PI * f64::from(tone_hz) / f64::from(sample_rate.max(1));
    let value = |frame: usize| ((first_sample + frame as u64) as f64 * step).sin() as f32 * 0.25;

    match layout {
        SampleLayout::F32Planar => {
            let mut data = Vec::with_capacity(frames * channels);
            for _ in 0..channels {
                data.extend((0..frames).map(value));
            }
            AudioData::F32(data)
        }
        SampleLayout::F32Interleaved => AudioData::F32(
            (0..frames).flat_map(|f| std::iter::repeat(value(f)).take(channels)).collect(),
        ),
        SampleLayout::S16Interleaved => AudioData::S16(
            (0..frames)
                .flat_map(|f| std::iter::repeat((value(f) * 32767.0) as i16).take(channels))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::log_reporter;
    use parking_lot::Mutex;

    fn media(config: SyntheticConfig) -> SyntheticMedia {
        SyntheticMedia::new(config)
    }

    async fn collect(mut stream: ChunkStream) -> Vec<CompressedChunk> {
        let mut chunks = Vec::new();
        while let Some(chunk) = stream.next_chunk().await.unwrap() {
            chunks.push(chunk);
        }
        chunks
    }

    #[tokio::test]
    async fn test_video_read_full_track() {
        let media = media(SyntheticConfig { duration: Duration::from_secs(2), ..Default::default() });
        let chunks = collect(media.read(TrackKind::Video, 0.0, 0.0, SeekMode::Any).unwrap()).await;

        assert_eq!(chunks.len(), 60);
        assert!(chunks[0].key);
        assert!(chunks.windows(2).all(|w| w[0].pts < w[1].pts));
        assert_eq!(chunks[59].sequence, 59);
    }

    #[tokio::test]
    async fn test_video_read_keyframe_mode_rewinds_to_gop() {
        let media = media(SyntheticConfig::default());
        let any = collect(media.read(TrackKind::Video, 5.5, 6.0, SeekMode::Any).unwrap()).await;
        let key = collect(media.read(TrackKind::Video, 5.5, 6.0, SeekMode::Keyframe).unwrap()).await;

        assert_eq!(any[0].pts, secs_to_micros(5.5));
        assert_eq!(key[0].pts, 5_000_000);
        assert!(key[0].key);
        assert_eq!(any[0].sequence, 0);
    }

    #[tokio::test]
    async fn test_audio_read_is_block_aligned() {
        let media = media(SyntheticConfig::default());
        let chunks = collect(media.read(TrackKind::Audio, 1.0, 1.1, SeekMode::Any).unwrap()).await;

        let (first_sample, frames) = parse_audio_payload(&chunks[0].payload).unwrap();
        assert_eq!(first_sample % 1024, 0);
        assert!(first_sample <= 48_000);
        assert_eq!(frames, 1024);
        let covered: usize = chunks.iter().map(|c| parse_audio_payload(&c.payload).unwrap().1).sum();
        assert!(first_sample as usize + covered >= (1.1 * 48_000.0) as usize - 1);
    }

    #[tokio::test]
    async fn test_missing_track_is_configuration_error() {
        let media = media(SyntheticConfig { include_audio: false, ..Default::default() });
        assert!(media.media_info().unwrap().audio.is_none());
        assert!(matches!(
            media.read(TrackKind::Audio, 0.0, 0.0, SeekMode::Any),
            Err(SyncError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_video_decoder_outputs_in_order_and_drains() {
        let media = media(SyntheticConfig::default());
        let frames = Arc::new(Mutex::new(Vec::new()));
        let sink = frames.clone();
        let mut decoder = media
            .create_video_decoder(DecoderCallbacks {
                output: Arc::new(move |frame: DecodedVideoFrame| sink.lock().push(frame)),
                error: log_reporter(),
            })
            .unwrap();

        let info = media.media_info().unwrap();
        assert!(decoder.decode(collect(media.read(TrackKind::Video, 0.0, 0.1, SeekMode::Any).unwrap()).await.remove(0)).is_err());
        decoder.configure(&DecoderConfig::for_video(info.video_track().unwrap())).unwrap();

        for chunk in collect(media.read(TrackKind::Video, 0.0, 0.2, SeekMode::Any).unwrap()).await {
            decoder.decode(chunk).unwrap();
        }
        for _ in 0..100 {
            if decoder.decode_queue_size() == 0 && frames.lock().len() == 6 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let frames = frames.lock();
        assert_eq!(frames.len(), 6);
        assert!(frames.windows(2).all(|w| w[0].pts < w[1].pts));
        assert_eq!(frames[0].pixels.len(), 160 * 90 * 4);
        assert_eq!(media.frame_pool().live(), 6);
    }

    #[tokio::test]
    async fn test_malformed_chunk_rejected_synchronously() {
        let media = media(SyntheticConfig::default());
        let mut decoder = media
            .create_video_decoder(DecoderCallbacks { output: Arc::new(|_: DecodedVideoFrame| {}), error: log_reporter() })
            .unwrap();
        decoder
            .configure(&DecoderConfig::for_video(media.media_info().unwrap().video_track().unwrap()))
            .unwrap();

        let chunk = CompressedChunk {
            track: TrackKind::Video,
            sequence: 0,
            pts: 0,
            duration: 0,
            key: true,
            payload: b"garbage".to_vec(),
        };
        assert!(matches!(decoder.decode(chunk), Err(SyncError::Decode(_))));
        assert_eq!(decoder.decode_queue_size(), 0);

        decoder.close();
        assert_eq!(decoder.state(), DecoderState::Closed);
    }

    #[test]
    fn test_tone_layouts_agree() {
        let planar = synthesize_tone(100, 4, 2, 48_000, 440.0, SampleLayout::F32Planar);
        let interleaved = synthesize_tone(100, 4, 2, 48_000, 440.0, SampleLayout::F32Interleaved);
        match (planar, interleaved) {
            (AudioData::F32(p), AudioData::F32(i)) => {
                assert_eq!(p[1], i[2]);
                assert_eq!(p[4 + 1], i[3]);
            }
            _ => panic!("expected f32 data"),
        }
    }
}
