use std::{io::BufRead, path::PathBuf};

use anyhow::{bail, Context, Result};

use rpick_core::{Dataset, DepthFrame, NormalizedCoordinates, Real};
use rpick_sensor::PinholeCamera;

/// Replays a recorded picking session from disk:
///
/// - `calib.txt` — one line of whitespace-separated `fx fy cx cy`
/// - `coordinate.csv` — one `nx,ny` record (the last coordinate the
///   detector published)
/// - `frames/*.csv` — depth grids, one row per image row, replayed in
///   filename order
pub struct SessionReader {
    session_path: PathBuf,
    camera: Option<PinholeCamera>,
    coordinate: Option<NormalizedCoordinates>,
    frame_paths: Vec<PathBuf>,
}

impl SessionReader {
    pub fn new(session_path: &str) -> Self {
        SessionReader {
            session_path: PathBuf::from(session_path),
            camera: None,
            coordinate: None,
            frame_paths: vec![],
        }
    }

    pub fn load_calibration(&mut self) -> Result<()> {
        let calib_file_path = self.session_path.join("calib.txt");

        let file = std::fs::File::open(&calib_file_path)
            .with_context(|| format!("opening {}", calib_file_path.display()))?;
        let file = std::io::BufReader::new(file);

        let line = file
            .lines()
            .next()
            .context("calibration file is empty")??;
        let params: Vec<Real> = line
            .split_whitespace()
            .map(|p| p.parse::<Real>())
            .collect::<Result<_, _>>()
            .context("calibration parameters are not numeric")?;
        if params.len() != 4 {
            bail!("expected `fx fy cx cy`, got {} values", params.len());
        }

        self.camera = Some(PinholeCamera::from_params(
            params[0], params[1], params[2], params[3],
        )?);
        Ok(())
    }

    pub fn load_coordinate(&mut self) -> Result<()> {
        let coordinate_path = self.session_path.join("coordinate.csv");

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(&coordinate_path)
            .with_context(|| format!("opening {}", coordinate_path.display()))?;
        let record = reader
            .records()
            .next()
            .context("coordinate file is empty")??;
        if record.len() != 2 {
            bail!("expected `nx,ny`, got {} fields", record.len());
        }

        let nx: Real = record[0].trim().parse()?;
        let ny: Real = record[1].trim().parse()?;
        self.coordinate = Some(NormalizedCoordinates::new(nx, ny));
        Ok(())
    }

    pub fn load_frame_index(&mut self) -> Result<()> {
        let frames_dir = self.session_path.join("frames");

        let mut paths: Vec<PathBuf> = std::fs::read_dir(&frames_dir)
            .with_context(|| format!("listing {}", frames_dir.display()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "csv"))
            .collect();
        paths.sort();

        log::info!("session holds {} depth frames", paths.len());
        self.frame_paths = paths;
        Ok(())
    }

    pub fn camera(&self) -> Option<&PinholeCamera> {
        self.camera.as_ref()
    }

    pub fn coordinate(&self) -> Option<NormalizedCoordinates> {
        self.coordinate
    }

    fn read_frame(&self, path: &PathBuf) -> Result<DepthFrame> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)
            .with_context(|| format!("opening {}", path.display()))?;

        let mut data: Vec<Real> = vec![];
        let mut cols = 0;
        let mut rows = 0;
        for record in reader.records() {
            let record = record?;
            if rows == 0 {
                cols = record.len();
            } else if record.len() != cols {
                bail!(
                    "ragged depth grid in {}: row {} has {} samples, expected {}",
                    path.display(),
                    rows,
                    record.len(),
                    cols
                );
            }
            for field in record.iter() {
                data.push(field.trim().parse::<Real>()?);
            }
            rows += 1;
        }

        Ok(DepthFrame::new(rows, cols, data)?)
    }
}

impl Dataset<DepthFrame> for SessionReader {
    fn get(&self, index: usize) -> Option<DepthFrame> {
        let path = self.frame_paths.get(index)?;
        match self.read_frame(path) {
            Ok(frame) => Some(frame),
            Err(err) => {
                log::error!("skipping unreadable frame {}: {err}", path.display());
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.frame_paths.len()
    }
}
