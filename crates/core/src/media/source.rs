//! Frame sources backed by memory and by MJPEG files.

use std::collections::VecDeque;
use std::io;
use std::path::{Component, Path, PathBuf};

use super::{FrameSource, FrameSourceFactory};
use crate::error::{Result, RtspError};

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Frames held in memory, yielded in order.
#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    frames: VecDeque<Vec<u8>>,
}

impl MemorySource {
    pub fn new(frames: impl IntoIterator<Item = Vec<u8>>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FrameSource for MemorySource {
    fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.frames.pop_front())
    }

    fn close(&mut self) {
        self.frames.clear();
    }
}

/// Concatenated JPEG images, one frame per SOI..EOI span.
///
/// Nested SOI/EOI pairs (EXIF thumbnails) stay inside their enclosing frame.
/// Bytes outside any image are skipped.
#[derive(Debug)]
pub struct MjpegFileSource {
    path: PathBuf,
    data: Vec<u8>,
    pos: usize,
}

impl MjpegFileSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = std::fs::read(&path)?;
        tracing::debug!(path = %path.display(), bytes = data.len(), "opened MJPEG file");
        Ok(Self::from_bytes(path, data))
    }

    fn from_bytes(path: PathBuf, data: Vec<u8>) -> Self {
        Self { path, data, pos: 0 }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameSource for MjpegFileSource {
    fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(start) = find(&self.data, self.pos, SOI) else {
            self.pos = self.data.len();
            return Ok(None);
        };

        let mut depth = 0usize;
        let mut i = start;
        while i + 1 < self.data.len() {
            let marker = [self.data[i], self.data[i + 1]];
            if marker == SOI {
                depth += 1;
                i += 2;
            } else if marker == EOI {
                depth -= 1;
                i += 2;
                if depth == 0 {
                    self.pos = i;
                    return Ok(Some(self.data[start..i].to_vec()));
                }
            } else {
                i += 1;
            }
        }

        tracing::warn!(path = %self.path.display(), offset = start, "truncated JPEG at end of file");
        self.pos = self.data.len();
        Ok(None)
    }

    fn close(&mut self) {
        self.data = Vec::new();
        self.pos = 0;
    }
}

fn find(data: &[u8], from: usize, marker: [u8; 2]) -> Option<usize> {
    data.get(from..)?
        .windows(2)
        .position(|w| w == marker)
        .map(|offset| from + offset)
}

/// Resolves SETUP paths to MJPEG files under a media root.
#[derive(Debug, Clone)]
pub struct MjpegDirectory {
    root: PathBuf,
}

impl MjpegDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Map a request path onto the media root. Only plain path components are
    /// accepted, so a request can never escape the root.
    pub fn resolve(&self, path: &str) -> Option<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        let mut resolved = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => return None,
            }
        }
        (resolved != self.root).then_some(resolved)
    }
}

impl FrameSourceFactory for MjpegDirectory {
    fn open(&self, path: &str) -> Result<Box<dyn FrameSource>> {
        let resolved = self
            .resolve(path)
            .ok_or_else(|| RtspError::ResourceNotFound(path.to_string()))?;

        match MjpegFileSource::open(&resolved) {
            Ok(source) => Ok(Box::new(source)),
            Err(RtspError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                Err(RtspError::ResourceNotFound(path.to_string()))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg(body: &[u8]) -> Vec<u8> {
        let mut image = SOI.to_vec();
        image.extend_from_slice(body);
        image.extend_from_slice(&EOI);
        image
    }

    fn drain(source: &mut dyn FrameSource) -> Vec<Vec<u8>> {
        std::iter::from_fn(|| source.next_frame().unwrap()).collect()
    }

    #[test]
    fn memory_source_yields_in_order() {
        let mut source = MemorySource::new(vec![vec![1], vec![2]]);
        assert_eq!(drain(&mut source), vec![vec![1], vec![2]]);
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn splits_concatenated_images() {
        let a = jpeg(&[1, 2, 3]);
        let b = jpeg(&[4, 5]);
        let mut data = vec![0x00, 0x11];
        data.extend_from_slice(&a);
        data.extend_from_slice(&b);

        let mut source = MjpegFileSource::from_bytes(PathBuf::from("mem"), data);
        assert_eq!(drain(&mut source), vec![a, b]);
    }

    #[test]
    fn nested_thumbnail_stays_in_frame() {
        let mut body = vec![0xE1];
        body.extend_from_slice(&jpeg(&[9]));
        body.push(7);
        let outer = jpeg(&body);

        let mut source = MjpegFileSource::from_bytes(PathBuf::from("mem"), outer.clone());
        assert_eq!(drain(&mut source), vec![outer]);
    }

    #[test]
    fn truncated_image_ends_stream() {
        let mut data = jpeg(&[1]);
        data.extend_from_slice(&[0xFF, 0xD8, 2, 3]);

        let mut source = MjpegFileSource::from_bytes(PathBuf::from("mem"), data);
        assert_eq!(drain(&mut source).len(), 1);
    }

    #[test]
    fn directory_rejects_escaping_paths() {
        let dir = MjpegDirectory::new("/srv/media");
        assert_eq!(dir.resolve("movie.mjpeg"), Some(PathBuf::from("/srv/media/movie.mjpeg")));
        assert_eq!(dir.resolve("/a/./b.mjpeg"), Some(PathBuf::from("/srv/media/a/b.mjpeg")));
        assert_eq!(dir.resolve("../etc/passwd"), None);
        assert_eq!(dir.resolve("a/../../x"), None);
        assert_eq!(dir.resolve(""), None);
    }

    #[test]
    fn missing_file_is_resource_not_found() {
        let dir = MjpegDirectory::new(std::env::temp_dir());
        assert!(matches!(
            dir.open("definitely-missing-stream.mjpeg"),
            Err(RtspError::ResourceNotFound(_))
        ));
    }

    #[test]
    fn opens_file_from_directory() {
        let root = std::env::temp_dir().join(format!("rtsp-stream-test-{}", std::process::id()));
        std::fs::create_dir_all(&root).unwrap();
        let data = [jpeg(&[1]), jpeg(&[2, 2])].concat();
        std::fs::write(root.join("clip.mjpeg"), &data).unwrap();

        let mut source = MjpegDirectory::new(&root).open("clip.mjpeg").unwrap();
        assert_eq!(drain(source.as_mut()).len(), 2);

        std::fs::remove_dir_all(&root).unwrap();
    }
}
