use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use rtp_runtime::media::h264::H264Packetizer;
use rtp_runtime::{Frame, MediaRuntime, StreamKind};

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Video,
    Audio,
}

impl From<Kind> for StreamKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Video => StreamKind::Video,
            Kind::Audio => StreamKind::Audio,
        }
    }
}

#[derive(Parser)]
#[command(name = "rtp-send", about = "Send an H.264 file or test audio over RTP")]
struct Args {
    /// Destination address (host:port)
    #[arg(long, short)]
    address: String,

    /// Stream kind
    #[arg(long, short, value_enum, default_value_t = Kind::Video)]
    kind: Kind,

    /// Annex B H.264 file (required for video)
    #[arg(long, short)]
    input: Option<PathBuf>,

    /// Frames per second (video); audio always sends 20 ms frames
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Synthetic audio frames to send
    #[arg(long, default_value_t = 250)]
    count: usize,

    /// Repeat the input until Enter is pressed
    #[arg(long = "loop")]
    repeat: bool,
}

/// Group Annex B NAL units into access units, each re-emitted with 4-byte
/// start codes.
///
/// A new access unit begins at an access unit delimiter, or at an SPS, PPS,
/// SEI or first slice (`first_mb_in_slice == 0`) that follows a slice.
fn access_units(data: &[u8]) -> Vec<Vec<u8>> {
    let mut units = Vec::new();
    let mut current = Vec::new();
    let mut has_slice = false;

    for nal in H264Packetizer::extract_nal_units(data) {
        let nal_type = nal[0] & 0x1f;
        let is_slice = matches!(nal_type, 1 | 5);
        let first_slice = is_slice && nal.get(1).is_some_and(|b| b & 0x80 != 0);
        let boundary = nal_type == 9
            || (has_slice && (matches!(nal_type, 6 | 7 | 8) || first_slice));

        if boundary && !current.is_empty() {
            units.push(std::mem::take(&mut current));
            has_slice = false;
        }

        current.extend_from_slice(&[0, 0, 0, 1]);
        current.extend_from_slice(nal);
        has_slice |= is_slice;
    }

    if !current.is_empty() {
        units.push(current);
    }
    units
}

/// 20 ms of stand-in Opus payload: a TOC byte followed by filler.
fn synthetic_audio_frame(index: usize) -> Vec<u8> {
    let mut frame = vec![0xfc];
    frame.extend((0..79).map(|i| (index + i) as u8));
    frame
}

fn load_frames(args: &Args) -> Result<Vec<Vec<u8>>, String> {
    match args.kind {
        Kind::Video => {
            let path = args.input.as_ref().ok_or("--input is required for video")?;
            let data = std::fs::read(path)
                .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
            let units = access_units(&data);
            if units.is_empty() {
                return Err(format!("no H.264 NAL units found in {}", path.display()));
            }
            Ok(units)
        }
        Kind::Audio => Ok((0..args.count).map(synthetic_audio_frame).collect()),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let kind = StreamKind::from(args.kind);

    let frames = match load_frames(&args) {
        Ok(frames) => frames,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let interval = match args.kind {
        Kind::Video => Duration::from_secs(1) / args.fps.max(1),
        Kind::Audio => Duration::from_millis(20),
    };

    let runtime = MediaRuntime::new();
    if let Err(e) = runtime.set_signalling_address(args.address.as_bytes()) {
        eprintln!("Invalid address: {}", e);
        return ExitCode::FAILURE;
    }
    if let Err(e) = runtime.start(kind) {
        eprintln!("Failed to start {} runtime: {}", kind, e);
        return ExitCode::FAILURE;
    }

    if let Some(attributes) = runtime.media_attributes(kind) {
        for attribute in attributes {
            println!("{}", attribute);
        }
    }

    let running = Arc::new(AtomicBool::new(true));
    if args.repeat {
        println!("Sending {} to {}, press Enter to stop", kind, args.address);
        let running = running.clone();
        thread::spawn(move || {
            let mut input = String::new();
            let _ = io::stdin().read_line(&mut input);
            running.store(false, Ordering::SeqCst);
        });
    }

    let mut next = Instant::now();
    'send: loop {
        for data in &frames {
            if !running.load(Ordering::SeqCst) {
                break 'send;
            }
            if !runtime.submit_frame(kind, Frame::new(data.clone())) {
                tracing::warn!(kind = %kind, len = data.len(), "frame rejected");
            }

            next += interval;
            if let Some(wait) = next.checked_duration_since(Instant::now()) {
                thread::sleep(wait);
            }
        }
        if !args.repeat {
            break;
        }
    }

    runtime.stop(kind);

    let stats = runtime.stats(kind);
    tracing::info!(
        kind = %kind,
        transmitted = stats.frames_transmitted,
        rejected = stats.frames_rejected,
        abandoned = stats.frames_abandoned,
        failed = stats.frames_failed,
        packets = stats.packets_sent,
        bytes = stats.bytes_sent,
        retries = stats.send_retries,
        "stream finished"
    );

    if stats.frames_failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annexb(nals: &[&[u8]]) -> Vec<u8> {
        nals.iter()
            .flat_map(|nal| [&[0u8, 0, 0, 1][..], *nal].concat())
            .collect()
    }

    #[test]
    fn splits_on_first_slice() {
        let data = annexb(&[
            &[0x67, 0x42],
            &[0x68, 0xce],
            &[0x65, 0x88],
            &[0x41, 0x9a],
            &[0x41, 0x9b],
        ]);
        let units = access_units(&data);
        assert_eq!(units.len(), 3);
        assert_eq!(units[0], annexb(&[&[0x67, 0x42], &[0x68, 0xce], &[0x65, 0x88]]));
        assert_eq!(units[2], annexb(&[&[0x41, 0x9b]]));
    }

    #[test]
    fn continuation_slice_stays_in_unit() {
        // Second slice has first_mb_in_slice != 0 (leading bit clear).
        let data = annexb(&[&[0x65, 0x88], &[0x65, 0x40]]);
        assert_eq!(access_units(&data).len(), 1);
    }

    #[test]
    fn aud_starts_unit() {
        let data = annexb(&[&[0x09, 0xf0], &[0x41, 0x9a], &[0x09, 0xf0], &[0x41, 0x9a]]);
        assert_eq!(access_units(&data).len(), 2);
    }

    #[test]
    fn audio_frames_are_twenty_ms_sized() {
        let frame = synthetic_audio_frame(3);
        assert_eq!(frame.len(), 80);
        assert_eq!(frame[0], 0xfc);
    }
}
