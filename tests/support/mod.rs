#![allow(dead_code)]

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clipdrop_core::error::AppError;
use clipdrop_core::ffmpeg::{CancelToken, NULL_SINK, ResolutionProbe, Transcoder};
use clipdrop_core::progress::ProgressCallback;
use clipdrop_core::upload::UploadSink;
use clipdrop_core::{ClipCompressor, CompressSettings, Resolution};
use parking_lot::Mutex;

pub const MB: u64 = 1024 * 1024;

/// One FFmpeg invocation as seen by the fake transcoder.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub args: Vec<String>,
    pub input: String,
    pub output: String,
    pub codec: String,
    pub pass: Option<String>,
    pub filters: Option<String>,
}

impl Invocation {
    fn parse(args: &[String]) -> Self {
        let value_after = |flag: &str| {
            args.iter()
                .position(|a| a == flag)
                .and_then(|i| args.get(i + 1))
                .cloned()
        };
        Self {
            args: args.to_vec(),
            input: value_after("-i").unwrap_or_default(),
            output: args.last().cloned().unwrap_or_default(),
            codec: value_after("-c:v").unwrap_or_default(),
            pass: value_after("-pass"),
            filters: value_after("-vf"),
        }
    }

    /// `WxH` from a software `scale=` filter.
    pub fn scale(&self) -> Option<&str> {
        self.filters
            .as_deref()?
            .split(',')
            .find_map(|f| f.strip_prefix("scale="))
    }

    /// Writes the tier temp file for `resolution` (`WxH`).
    pub fn is_tier(&self, resolution: &str) -> bool {
        self.output.ends_with(&format!("_{}.temp.mp4", resolution))
    }

    /// `<scale>|<codec>`, stamped at the start of every file the fake writes.
    pub fn tag(&self) -> String {
        format!("{}|{}", self.scale().unwrap_or("-"), self.codec)
    }

    pub fn is_recovery(&self) -> bool {
        self.input.ends_with(".temp_oversized_original.mp4")
    }

    pub fn writes_file(&self) -> bool {
        self.output != NULL_SINK
    }
}

/// What the fake does for one invocation.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    /// Write this many bytes to the output (nothing for a first pass).
    Write(u64),
    /// Exit with this code.
    Fail(i32),
    /// Fail with memory exhaustion.
    Oom,
    /// Cancel the pipeline's token, as a user would mid-encode.
    Cancel,
}

type Script = dyn Fn(&Invocation) -> Step + Send + Sync;

/// Transcoder whose behavior per invocation comes from a script; records every call.
pub struct ScriptedTranscoder {
    script: Box<Script>,
    calls: Mutex<Vec<Invocation>>,
}

impl ScriptedTranscoder {
    pub fn new(script: impl Fn(&Invocation) -> Step + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().clone()
    }

    pub fn codecs(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.codec).collect()
    }
}

impl Transcoder for ScriptedTranscoder {
    fn run(
        &self,
        args: &[String],
        _duration_secs: f64,
        on_progress: &dyn Fn(u8),
        cancel: &CancelToken,
    ) -> Result<(), AppError> {
        cancel.check()?;
        let invocation = Invocation::parse(args);
        self.calls.lock().push(invocation.clone());
        match (self.script)(&invocation) {
            Step::Write(bytes) => {
                on_progress(50);
                if invocation.writes_file() {
                    let mut file = File::create(&invocation.output)?;
                    let tag = invocation.tag();
                    if bytes >= tag.len() as u64 {
                        file.write_all(tag.as_bytes())?;
                    }
                    file.set_len(bytes)?;
                }
                on_progress(100);
                Ok(())
            }
            Step::Fail(code) => Err(AppError::ffmpeg_failed(
                code,
                format!("Error while opening encoder for {}", invocation.codec),
            )),
            Step::Oom => Err(AppError::OutOfMemory {
                code: 1,
                stderr: "Cannot allocate memory".into(),
            }),
            Step::Cancel => {
                on_progress(30);
                cancel.cancel();
                Err(AppError::Aborted)
            }
        }
    }
}

/// Reports the same resolution for every file; records probed paths.
pub struct FixedProbe {
    resolution: Option<Resolution>,
    probed: Mutex<Vec<PathBuf>>,
}

impl FixedProbe {
    pub fn new(resolution: Option<Resolution>) -> Arc<Self> {
        Arc::new(Self {
            resolution,
            probed: Mutex::new(Vec::new()),
        })
    }

    pub fn probed(&self) -> Vec<PathBuf> {
        self.probed.lock().clone()
    }
}

impl ResolutionProbe for FixedProbe {
    fn probe_resolution(&self, path: &Path) -> Option<Resolution> {
        self.probed.lock().push(path.to_path_buf());
        self.resolution
    }
}

/// Upload sink that fails destinations containing "fail"; records what was sent.
#[derive(Default)]
pub struct RecordingSink {
    pub sent: Mutex<Vec<(String, Option<String>, u64)>>,
}

impl UploadSink for RecordingSink {
    fn upload(&self, file: &Path, destination: &str, title: Option<&str>) -> Result<(), AppError> {
        let size = fs::metadata(file)?.len();
        self.sent
            .lock()
            .push((destination.to_string(), title.map(str::to_string), size));
        if destination.contains("fail") {
            return Err(AppError::Upload("File too large for Discord".into()));
        }
        Ok(())
    }
}

/// Progress callback plus the values it received.
pub fn progress_recorder() -> (ProgressCallback, Arc<Mutex<Vec<u8>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (Arc::new(move |p: u8| sink.lock().push(p)), seen)
}

/// Scratch directory with a sparse source file of the given size.
pub struct ClipEnv {
    pub dir: tempfile::TempDir,
    pub source: PathBuf,
    pub output: PathBuf,
}

impl ClipEnv {
    pub fn new(source_size: u64) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("recording.mp4");
        File::create(&source)
            .and_then(|f| f.set_len(source_size))
            .expect("create source");
        let output = dir.path().join("clips").join("clip.mp4");
        Self { dir, source, output }
    }

    /// Every file left in the clips directory, sorted.
    pub fn leftovers(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(self.output.parent().expect("parent")) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

/// The tag the fake stamped into `path`, or an empty string.
pub fn file_tag(path: &Path) -> String {
    let mut head = [0u8; 64];
    let read = File::open(path)
        .and_then(|mut f| f.read(&mut head))
        .unwrap_or(0);
    let end = head[..read].iter().position(|b| *b == 0).unwrap_or(read);
    String::from_utf8_lossy(&head[..end]).into_owned()
}

pub fn compressor(
    encoder: &str,
    transcoder: Arc<ScriptedTranscoder>,
    probe: Arc<FixedProbe>,
    uploader: Arc<RecordingSink>,
) -> ClipCompressor {
    compressor_with(CompressSettings::default(), encoder, transcoder, probe, uploader)
}

pub fn compressor_with(
    settings: CompressSettings,
    encoder: &str,
    transcoder: Arc<ScriptedTranscoder>,
    probe: Arc<FixedProbe>,
    uploader: Arc<RecordingSink>,
) -> ClipCompressor {
    ClipCompressor::new(settings, encoder)
        .with_transcoder(transcoder)
        .with_probe(probe)
        .with_uploader(uploader)
}
