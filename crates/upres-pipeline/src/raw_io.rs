//! Raw rgb24 frame I/O.
//!
//! A raw stream is frames of `height × width × 3` bytes concatenated with no
//! header, e.g. what `ffmpeg -f rawvideo -pix_fmt rgb24` produces.  Byte
//! order within a pixel is passed through untouched, so `bgr24` works too.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use upres_core::error::{Result, UpresError};
use upres_core::frame::{FRAME_CHANNELS, FrameBuffer};
use upres_core::stream_traits::{FrameSink, FrameSource};

const IO_BUFFER_BYTES: usize = 4 * 1024 * 1024;

/// Reads fixed-size frames from a byte stream.
pub struct RawFrameSource {
    reader: Box<dyn Read + Send>,
    height: usize,
    width: usize,
    frame_rate: Option<f64>,
    frames_read: u64,
    label: String,
}

impl RawFrameSource {
    pub fn open(path: &Path, width: usize, height: usize, frame_rate: Option<f64>) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            UpresError::Stream(format!("Failed to open input {}: {e}", path.display()))
        })?;
        tracing::info!(path = %path.display(), width, height, "Raw input source opened");
        Self::from_reader(
            BufReader::with_capacity(IO_BUFFER_BYTES, file),
            width,
            height,
            frame_rate,
        )
        .map(|s| s.with_label(path.display().to_string()))
    }

    pub fn from_reader(
        reader: impl Read + Send + 'static,
        width: usize,
        height: usize,
        frame_rate: Option<f64>,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(UpresError::Config(format!(
                "Raw input needs non-zero dimensions, got {width}x{height}"
            )));
        }
        Ok(Self {
            reader: Box::new(reader),
            height,
            width,
            frame_rate,
            frames_read: 0,
            label: "<reader>".into(),
        })
    }

    fn with_label(mut self, label: String) -> Self {
        self.label = label;
        self
    }

    pub fn frame_bytes(&self) -> usize {
        self.height * self.width * FRAME_CHANNELS
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }
}

/// Fill `buf` completely.  Returns the byte count read before EOF.
fn read_full(reader: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

impl FrameSource for RawFrameSource {
    fn next_frame(&mut self) -> Result<Option<FrameBuffer>> {
        let mut data = vec![0u8; self.frame_bytes()];
        let got = read_full(self.reader.as_mut(), &mut data).map_err(|e| {
            UpresError::Stream(format!("Failed to read from {}: {e}", self.label))
        })?;
        if got == 0 {
            tracing::debug!(frames = self.frames_read, "Raw input exhausted");
            return Ok(None);
        }
        if got < data.len() {
            return Err(UpresError::Stream(format!(
                "Truncated frame {} in {}: got {got} of {} bytes",
                self.frames_read,
                self.label,
                data.len()
            )));
        }
        self.frames_read += 1;
        FrameBuffer::new(self.height, self.width, data).map(Some)
    }

    fn native_frame_rate(&self) -> Option<f64> {
        self.frame_rate
    }
}

/// Writes emitted frames back to back.
pub struct RawFrameSink {
    writer: Box<dyn Write + Send>,
    frames_written: u64,
    bytes_written: u64,
    label: String,
}

impl RawFrameSink {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|e| {
            UpresError::Stream(format!("Failed to create output {}: {e}", path.display()))
        })?;
        tracing::info!(path = %path.display(), "Raw output sink opened");
        let mut sink = Self::from_writer(BufWriter::with_capacity(IO_BUFFER_BYTES, file));
        sink.label = path.display().to_string();
        Ok(sink)
    }

    pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Box::new(writer),
            frames_written: 0,
            bytes_written: 0,
            label: "<writer>".into(),
        }
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

impl FrameSink for RawFrameSink {
    fn emit(&mut self, frame: &FrameBuffer) -> Result<()> {
        let write = match frame.as_slice() {
            Some(bytes) => self.writer.write_all(bytes),
            None => self.writer.write_all(&frame.to_vec()),
        };
        write.map_err(|e| UpresError::Stream(format!("Failed to write to {}: {e}", self.label)))?;

        self.bytes_written += frame.byte_len() as u64;
        self.frames_written += 1;
        if self.frames_written % 100 == 0 {
            tracing::debug!(
                frames = self.frames_written,
                bytes_mb = self.bytes_written / (1024 * 1024),
                "Sink progress"
            );
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| UpresError::Stream(format!("Failed to flush {}: {e}", self.label)))?;
        tracing::info!(
            path = %self.label,
            frames = self.frames_written,
            bytes = self.bytes_written,
            "Raw output sink flushed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn reads_whole_frames_until_eof() {
        let bytes: Vec<u8> = (0..2 * 2 * 2 * 3).map(|i| i as u8).collect();
        let mut source = RawFrameSource::from_reader(Cursor::new(bytes), 2, 2, Some(25.0)).unwrap();
        let first = source.next_frame().unwrap().unwrap();
        assert_eq!(first.to_vec(), (0..12).collect::<Vec<u8>>());
        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().unwrap().is_none());
        assert_eq!(source.frames_read(), 2);
        assert_eq!(source.native_frame_rate(), Some(25.0));
    }

    #[test]
    fn truncated_trailing_frame_is_an_error() {
        let mut source = RawFrameSource::from_reader(Cursor::new(vec![0u8; 12 + 5]), 2, 2, None).unwrap();
        assert!(source.next_frame().unwrap().is_some());
        let err = source.next_frame().unwrap_err();
        assert!(matches!(err, UpresError::Stream(_)));
        assert!(err.to_string().contains("got 5 of 12"), "{err}");
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        assert!(RawFrameSource::from_reader(Cursor::new(Vec::new()), 0, 4, None).is_err());
    }

    #[test]
    fn sink_writes_frames_back_to_back() {
        let buf = SharedBuf::default();
        let mut sink = RawFrameSink::from_writer(buf.clone());
        sink.emit(&FrameBuffer::new(1, 1, vec![1, 2, 3]).unwrap()).unwrap();
        sink.emit(&FrameBuffer::new(1, 2, vec![4, 5, 6, 7, 8, 9]).unwrap()).unwrap();
        sink.flush().unwrap();
        assert_eq!(*buf.0.lock().unwrap(), vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(sink.frames_written(), 2);
        assert_eq!(sink.bytes_written(), 9);
    }
}
