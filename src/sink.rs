//! Packet sinks
//!
//! The multiplexer hands every packet to an `OutputSink` in a single call.
//! Line speed and framing of a serial device are configured outside this
//! program (e.g. with `stty`); the device node is only opened for writing.

use crate::dither::write_pbm;
use log::{info, warn};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

pub trait OutputSink: Send {
    fn write_packet(&mut self, packet: &[u8]) -> io::Result<()>;
}

impl<S: OutputSink + ?Sized> OutputSink for Box<S> {
    fn write_packet(&mut self, packet: &[u8]) -> io::Result<()> {
        (**self).write_packet(packet)
    }
}

/// Sink over any writer; each packet is written whole and flushed
pub struct WriterSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> OutputSink for WriterSink<W> {
    fn write_packet(&mut self, packet: &[u8]) -> io::Result<()> {
        self.writer.write_all(packet)?;
        self.writer.flush()
    }
}

/// Open a device node (or plain file) for writing without truncating it
pub fn open_device(path: &Path) -> io::Result<WriterSink<File>> {
    let file = OpenOptions::new().write(true).create(true).open(path)?;
    Ok(WriterSink::new(file))
}

pub fn stdout_sink() -> WriterSink<io::Stdout> {
    WriterSink::new(io::stdout())
}

/// Resolve an output argument: `-` is standard output, anything else a device
pub fn open_output(target: &str) -> io::Result<Box<dyn OutputSink>> {
    if target == "-" {
        Ok(Box::new(stdout_sink()))
    } else {
        Ok(Box::new(open_device(Path::new(target))?))
    }
}

/// Passes packets through and saves the bitmap of the first one as a PBM image
pub struct FrameDumpSink<S: OutputSink> {
    inner: S,
    path: Option<PathBuf>,
    width: usize,
    height: usize,
}

impl<S: OutputSink> FrameDumpSink<S> {
    pub fn new(inner: S, path: PathBuf, width: u32, height: u32) -> Self {
        Self {
            inner,
            path: Some(path),
            width: width as usize,
            height: height as usize,
        }
    }

    fn dump(&self, path: &Path, packet: &[u8]) -> io::Result<()> {
        let bitmap_len = self.width * self.height / 8;
        let bitmap = packet.get(..bitmap_len).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "packet shorter than one bitmap")
        })?;
        let file = File::create(path)?;
        write_pbm(BufWriter::new(file), bitmap, self.width, self.height)
    }
}

impl<S: OutputSink> OutputSink for FrameDumpSink<S> {
    fn write_packet(&mut self, packet: &[u8]) -> io::Result<()> {
        if let Some(path) = self.path.take() {
            // a failed preview never fails the transmission
            match self.dump(&path, packet) {
                Ok(()) => info!("Saved first frame to {}", path.display()),
                Err(e) => warn!("Unable to save first frame to {}: {}", path.display(), e),
            }
        }
        self.inner.write_packet(packet)
    }
}
