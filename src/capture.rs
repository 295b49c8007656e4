use std::{
    fs,
    io::Cursor,
    path::{Path, PathBuf},
    thread::sleep,
    time::Duration,
};

use image::ImageOutputFormat;

use crate::{browser_controller::RenderSession, types::CaptureError};

/// One viewport capture. Written to disk as soon as it is produced.
#[derive(Debug)]
pub struct SnapshotRecord {
    pub sequence_number: usize,
    pub scroll_offset: u64,
    pub image_bytes: Vec<u8>,
}

impl SnapshotRecord {
    pub fn file_name(&self) -> String {
        format!("snapshot_{}.png", self.sequence_number)
    }

    pub fn persist(&self, folder: &Path) -> Result<PathBuf, CaptureError> {
        let path = folder.join(self.file_name());
        fs::write(&path, &self.image_bytes).map_err(|source| CaptureError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

/// Scrolls a rendered page one viewport at a time, capturing each step.
#[derive(Debug, Clone, Copy)]
pub struct ScrollCapture {
    pub min_snapshots: usize,
    pub max_snapshots: usize,
    pub scroll_pause: Duration,
}

impl ScrollCapture {
    pub fn new(min_snapshots: usize, max_snapshots: usize, scroll_pause: Duration) -> Self {
        ScrollCapture {
            min_snapshots,
            max_snapshots,
            scroll_pause,
        }
    }

    /// Measures the page and returns the lazy snapshot sequence.
    pub fn snapshots<'s>(
        &self,
        session: &'s mut RenderSession,
    ) -> Result<Snapshots<'s>, CaptureError> {
        let viewport_height = session.measure_viewport_height()?;
        if viewport_height == 0 {
            return Err(CaptureError::InvalidViewport);
        }
        let total_height = session.measure_total_height()?;
        debug!(
            "page height {}px, viewport height {}px",
            total_height, viewport_height
        );

        Ok(Snapshots {
            session,
            viewport_height,
            total_height,
            current_scroll: 0,
            taken: 0,
            max_snapshots: self.max_snapshots,
            scroll_pause: self.scroll_pause,
            failed: false,
        })
    }

    /// Writes `snapshot_<n>.png` files into `output_folder`, returning how
    /// many were taken.
    pub fn capture(
        &self,
        session: &mut RenderSession,
        output_folder: &Path,
    ) -> Result<usize, CaptureError> {
        let mut count = 0;
        for record in self.snapshots(session)? {
            let record = record?;
            let path = record.persist(output_folder)?;
            info!("saved snapshot {} to {:?}", record.sequence_number, path);
            count += 1;
        }

        if count < self.min_snapshots {
            warn!(
                "only {} snapshots taken for {:?}, page is shorter than {} viewports",
                count, output_folder, self.min_snapshots
            );
        }
        Ok(count)
    }
}

/// Finite, non-restartable sequence of snapshots in increasing scroll order.
///
/// Height growth noticed mid-scroll extends the sequence, but capture
/// resumes from the current offset; regions revealed above it are not
/// revisited.
pub struct Snapshots<'s> {
    session: &'s mut RenderSession,
    viewport_height: u64,
    total_height: u64,
    current_scroll: u64,
    taken: usize,
    max_snapshots: usize,
    scroll_pause: Duration,
    failed: bool,
}

impl<'s> Snapshots<'s> {
    pub fn viewport_height(&self) -> u64 {
        self.viewport_height
    }

    pub fn total_height(&self) -> u64 {
        self.total_height
    }

    fn step(&mut self) -> Result<SnapshotRecord, CaptureError> {
        self.session.scroll_to(self.current_scroll)?;
        if !self.scroll_pause.is_zero() {
            sleep(self.scroll_pause);
        }

        let height = self.session.measure_total_height()?;
        if height > self.total_height {
            info!(
                "page grew from {}px to {}px, lazy loaded content detected",
                self.total_height, height
            );
            self.total_height = height;
        }

        let png = self.session.screenshot()?;
        let image_bytes = normalize_png(&png)?;

        self.taken += 1;
        let record = SnapshotRecord {
            sequence_number: self.taken,
            scroll_offset: self.current_scroll,
            image_bytes,
        };
        self.current_scroll += self.viewport_height;
        Ok(record)
    }
}

impl<'s> Iterator for Snapshots<'s> {
    type Item = Result<SnapshotRecord, CaptureError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.taken >= self.max_snapshots {
            return None;
        }
        // the first viewport is always captured, even for an empty page
        if self.taken > 0 && self.current_scroll >= self.total_height {
            return None;
        }
        match self.step() {
            Ok(record) => Some(Ok(record)),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Re-encodes a screenshot as an 8-bit RGB PNG.
pub fn normalize_png(bytes: &[u8]) -> Result<Vec<u8>, CaptureError> {
    let rgb = image::load_from_memory(bytes)?.to_rgb8();
    let mut buffer = Vec::new();
    image::DynamicImage::ImageRgb8(rgb)
        .write_to(&mut Cursor::new(&mut buffer), ImageOutputFormat::Png)?;
    Ok(buffer)
}
