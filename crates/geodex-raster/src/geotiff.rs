//! GeoTIFF reading and writing.
//!
//! Georeferencing is taken from the standard GeoTIFF tags:
//! - `ModelTiepointTag` + `ModelPixelScaleTag`, or `ModelTransformationTag`
//!   for rotated rasters
//! - `GeoKeyDirectoryTag` for the EPSG code
//! - `GdalNodata` for the no-data value
//!
//! Pixels are decoded one strip or tile at a time; a window read touches
//! only the chunks it overlaps. Both chunky and planar layouts are read, with
//! any number of samples per pixel.

use crate::source::{PixelReader, PixelRect, RasterMeta, RasterReader, RasterSource};
use crate::{Crs, GeoTransform, RasterError, Result};
use ndarray::{Array3, Axis};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};
use tiff::decoder::{ChunkType, Decoder, DecodingResult, Limits};
use tiff::encoder::{DirectoryEncoder, TiffEncoder, TiffKind};
use tiff::tags::{
    CompressionMethod, PhotometricInterpretation, PlanarConfiguration, SampleFormat, Tag,
};
use tracing::{debug, trace};

const KEY_MODEL_TYPE: u16 = 1024;
const KEY_RASTER_TYPE: u16 = 1025;
const KEY_GEOGRAPHIC_TYPE: u16 = 2048;
const KEY_PROJECTED_CS_TYPE: u16 = 3072;

const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;

/// Decoding buffer limit; large archive tiles exceed the tiff crate default.
const DECODE_LIMIT_BYTES: usize = 1024 * 1024 * 1024;

/// Rows per strip in files written by [`write`].
const WRITE_ROWS_PER_STRIP: usize = 16;

/// Reads GeoTIFF files with the `tiff` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct GeoTiffReader;

impl RasterReader for GeoTiffReader {
    fn open(&self, path: &Path) -> Result<RasterSource> {
        let file = File::open(path)?;
        let mut decoder = Decoder::new(BufReader::new(file))?;

        let mut limits = Limits::default();
        limits.decoding_buffer_size = DECODE_LIMIT_BYTES;
        limits.intermediate_buffer_size = DECODE_LIMIT_BYTES;
        limits.ifd_value_size = DECODE_LIMIT_BYTES;
        decoder = decoder.with_limits(limits);

        let meta = read_meta(&mut decoder, path)?;
        let layout = ChunkLayout::read(&mut decoder, &meta)?;
        debug!(
            path = %path.display(),
            width = meta.width,
            height = meta.height,
            bands = meta.bands,
            crs = %meta.crs,
            chunks = layout.chunk_count(),
            "Opened GeoTIFF"
        );

        let reader = ChunkReader {
            decoder,
            path: path.to_path_buf(),
            bands: meta.bands,
            layout,
        };
        Ok(RasterSource::new(path, meta, Box::new(reader)))
    }
}

fn read_meta<R: Read + Seek>(decoder: &mut Decoder<R>, path: &Path) -> Result<RasterMeta> {
    let (width, height) = decoder.dimensions()?;
    let bands = band_count(decoder)?;
    let transform = read_transform(decoder, path)?;
    let crs = read_crs(decoder, path)?;
    let nodata = decoder
        .get_tag_ascii_string(Tag::GdalNodata)
        .ok()
        .and_then(|s| s.trim().trim_end_matches('\0').parse::<f32>().ok());

    Ok(RasterMeta {
        width: width as usize,
        height: height as usize,
        bands,
        crs,
        transform,
        nodata,
    })
}

/// Samples per pixel, whatever the photometric interpretation.
fn band_count<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<usize> {
    let samples = decoder
        .find_tag_unsigned::<u16>(Tag::SamplesPerPixel)?
        .unwrap_or(1);
    if samples == 0 {
        return Err(RasterError::UnsupportedDataType("zero samples per pixel".to_string()));
    }
    Ok(samples as usize)
}

fn read_transform<R: Read + Seek>(decoder: &mut Decoder<R>, path: &Path) -> Result<GeoTransform> {
    if let Ok(matrix) = decoder.get_tag_f64_vec(Tag::ModelTransformationTag) {
        if let Some(transform) = GeoTransform::from_model_transformation(&matrix) {
            return Ok(transform);
        }
    }

    let tiepoint = decoder.get_tag_f64_vec(Tag::ModelTiepointTag);
    let scale = decoder.get_tag_f64_vec(Tag::ModelPixelScaleTag);
    match (tiepoint, scale) {
        (Ok(tp), Ok(scale)) if tp.len() >= 6 && scale.len() >= 2 => Ok(GeoTransform::from_tiepoint(
            tp[0], tp[1], tp[3], tp[4], scale[0], scale[1],
        )),
        _ => Err(RasterError::InvalidGeoTiff {
            path: path.to_path_buf(),
            reason: "missing model tiepoint/pixel scale or transformation".to_string(),
        }),
    }
}

fn read_crs<R: Read + Seek>(decoder: &mut Decoder<R>, path: &Path) -> Result<Crs> {
    let invalid = |reason: &str| RasterError::InvalidGeoTiff {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let keys = decoder
        .get_tag_u16_vec(Tag::GeoKeyDirectoryTag)
        .map_err(|_| invalid("missing GeoKeyDirectoryTag"))?;
    if keys.len() < 4 {
        return Err(invalid("truncated GeoKeyDirectoryTag"));
    }

    // Header is [version, revision, minor, count]; entries are
    // [key, location, count, value] with location 0 meaning inline.
    let count = keys[3] as usize;
    let mut geographic = None;
    let mut projected = None;
    for entry in keys[4..].chunks_exact(4).take(count) {
        if entry[1] != 0 {
            continue;
        }
        match entry[0] {
            KEY_GEOGRAPHIC_TYPE => geographic = Some(entry[3]),
            KEY_PROJECTED_CS_TYPE => projected = Some(entry[3]),
            _ => {}
        }
    }

    projected
        .or(geographic)
        .filter(|&code| code != 0 && code != 32767)
        .map(|code| Crs::from_epsg(code as u32))
        .ok_or_else(|| invalid("no EPSG code in GeoKeyDirectoryTag"))
}

/// One strip or tile and where it sits in the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Chunk {
    index: u32,
    plane: usize,
    row_off: usize,
    col_off: usize,
}

/// How an image is cut into chunks.
///
/// Strips are chunks spanning the full width. Planar images repeat the
/// whole grid of chunks once per band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChunkLayout {
    chunk_width: usize,
    chunk_height: usize,
    across: usize,
    down: usize,
    planes: usize,
}

impl ChunkLayout {
    fn read<R: Read + Seek>(decoder: &mut Decoder<R>, meta: &RasterMeta) -> Result<Self> {
        let planar = decoder
            .find_tag_unsigned::<u16>(Tag::PlanarConfiguration)?
            .and_then(PlanarConfiguration::from_u16)
            == Some(PlanarConfiguration::Planar);
        let (chunk_width, chunk_height) = decoder.chunk_dimensions();
        let chunk_width = match decoder.get_chunk_type() {
            ChunkType::Strip => meta.width,
            ChunkType::Tile => chunk_width as usize,
        };
        Self::new(
            meta.width,
            meta.height,
            chunk_width,
            chunk_height as usize,
            if planar { meta.bands } else { 1 },
        )
    }

    fn new(width: usize, height: usize, chunk_width: usize, chunk_height: usize, planes: usize) -> Result<Self> {
        if chunk_width == 0 || chunk_height == 0 {
            return Err(RasterError::UnsupportedDataType("empty TIFF chunks".to_string()));
        }
        Ok(Self {
            chunk_width,
            chunk_height,
            across: width.div_ceil(chunk_width),
            down: height.div_ceil(chunk_height),
            planes,
        })
    }

    fn chunk_count(&self) -> usize {
        self.across * self.down * self.planes
    }

    fn is_planar(&self) -> bool {
        self.planes > 1
    }

    /// Chunks overlapping `rect`, plane by plane in file order.
    fn covering(&self, rect: PixelRect) -> Vec<Chunk> {
        if rect.is_empty() {
            return Vec::new();
        }
        let cols = rect.col_off / self.chunk_width..=(rect.col_end() - 1) / self.chunk_width;
        let rows = rect.row_off / self.chunk_height..=(rect.row_end() - 1) / self.chunk_height;

        let mut chunks = Vec::new();
        for plane in 0..self.planes {
            for cy in rows.clone() {
                for cx in cols.clone() {
                    chunks.push(Chunk {
                        index: (plane * self.across * self.down + cy * self.across + cx) as u32,
                        plane,
                        row_off: cy * self.chunk_height,
                        col_off: cx * self.chunk_width,
                    });
                }
            }
        }
        chunks
    }
}

/// Window reads over an open TIFF decoder.
struct ChunkReader<R: Read + Seek> {
    decoder: Decoder<R>,
    path: PathBuf,
    bands: usize,
    layout: ChunkLayout,
}

impl<R: Read + Seek + Send> PixelReader for ChunkReader<R> {
    fn read_window(&mut self, rect: PixelRect) -> Result<Array3<f32>> {
        let mut out = Array3::zeros((self.bands, rect.rows, rect.cols));
        let samples = if self.layout.is_planar() { 1 } else { self.bands };

        for chunk in self.layout.covering(rect) {
            let (data_width, data_height) = self.decoder.chunk_data_dimensions(chunk.index);
            let (data_width, data_height) = (data_width as usize, data_height as usize);
            let values = samples_to_f32(self.decoder.read_chunk(chunk.index)?)?;
            if values.len() < data_width * data_height * samples {
                return Err(RasterError::InvalidGeoTiff {
                    path: self.path.clone(),
                    reason: format!(
                        "chunk {} decoded {} samples, expected {}x{}x{}",
                        chunk.index,
                        values.len(),
                        data_height,
                        data_width,
                        samples
                    ),
                });
            }
            trace!(path = %self.path.display(), chunk = chunk.index, "Decoded chunk");

            let rows = rect.row_off.max(chunk.row_off)..rect.row_end().min(chunk.row_off + data_height);
            let cols = rect.col_off.max(chunk.col_off)..rect.col_end().min(chunk.col_off + data_width);
            for row in rows {
                for col in cols.clone() {
                    let base = ((row - chunk.row_off) * data_width + (col - chunk.col_off)) * samples;
                    let (r, c) = (row - rect.row_off, col - rect.col_off);
                    if self.layout.is_planar() {
                        out[[chunk.plane, r, c]] = values[base];
                    } else {
                        for band in 0..samples {
                            out[[band, r, c]] = values[base + band];
                        }
                    }
                }
            }
        }
        Ok(out)
    }
}

fn samples_to_f32(result: DecodingResult) -> Result<Vec<f32>> {
    #[allow(unreachable_patterns)]
    let samples = match result {
        DecodingResult::F32(data) => data,
        DecodingResult::F64(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I16(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I32(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U16(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U32(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U8(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I8(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U64(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I64(data) => data.into_iter().map(|v| v as f32).collect(),
        _ => {
            return Err(RasterError::UnsupportedDataType(
                "sample format without an f32 conversion".to_string(),
            ))
        }
    };
    Ok(samples)
}

/// Write a `(bands, rows, cols)` array as an uncompressed float GeoTIFF.
///
/// Three bands are tagged RGB; any other count is grayscale with extra
/// samples. Pixels are interleaved in strips of [`WRITE_ROWS_PER_STRIP`] rows.
pub fn write(
    path: &Path,
    data: &Array3<f32>,
    transform: &GeoTransform,
    crs: Crs,
    nodata: Option<f32>,
) -> Result<()> {
    let (bands, rows, cols) = data.dim();
    if bands == 0 || u16::try_from(bands).is_err() {
        return Err(RasterError::UnsupportedBandCount(bands));
    }
    let epsg = u16::try_from(crs.epsg()).map_err(|_| RasterError::UnsupportedCrs(crs.to_string()))?;
    let too_large = |_| RasterError::ShapeMismatch {
        expected: vec![u32::MAX as usize, u32::MAX as usize],
        found: vec![rows, cols],
    };
    let (width, height) = (u32::try_from(cols).map_err(too_large)?, u32::try_from(rows).map_err(too_large)?);

    // Back to pixel-interleaved order.
    let mut interleaved = Vec::with_capacity(bands * rows * cols);
    for row in 0..rows {
        for col in 0..cols {
            for band in data.axis_iter(Axis(0)) {
                interleaved.push(band[[row, col]]);
            }
        }
    }

    let file = File::create(path)?;
    let mut encoder = TiffEncoder::new(BufWriter::new(file))?;
    let mut dir = encoder.new_directory()?;

    let row_len = cols * bands;
    let mut offsets = Vec::new();
    let mut byte_counts = Vec::new();
    for strip in interleaved.chunks(WRITE_ROWS_PER_STRIP * row_len.max(1)) {
        let offset = dir.write_data(strip)?;
        offsets.push(u32::try_from(offset).map_err(|_| tiff::TiffError::IntSizeError)?);
        byte_counts.push(u32::try_from(std::mem::size_of_val(strip)).map_err(|_| tiff::TiffError::IntSizeError)?);
    }

    let photometric = if bands == 3 {
        PhotometricInterpretation::RGB
    } else {
        PhotometricInterpretation::BlackIsZero
    };
    dir.write_tag(Tag::ImageWidth, width)?;
    dir.write_tag(Tag::ImageLength, height)?;
    dir.write_tag(Tag::BitsPerSample, &vec![32u16; bands][..])?;
    dir.write_tag(Tag::SampleFormat, &vec![SampleFormat::IEEEFP.to_u16(); bands][..])?;
    dir.write_tag(Tag::SamplesPerPixel, bands as u16)?;
    dir.write_tag(Tag::Compression, CompressionMethod::None.to_u16())?;
    dir.write_tag(Tag::PhotometricInterpretation, photometric.to_u16())?;
    dir.write_tag(Tag::PlanarConfiguration, PlanarConfiguration::Chunky.to_u16())?;
    dir.write_tag(Tag::RowsPerStrip, WRITE_ROWS_PER_STRIP as u32)?;
    dir.write_tag(Tag::StripOffsets, &offsets[..])?;
    dir.write_tag(Tag::StripByteCounts, &byte_counts[..])?;
    if photometric == PhotometricInterpretation::BlackIsZero && bands > 1 {
        // Unspecified extra samples.
        dir.write_tag(Tag::ExtraSamples, &vec![0u16; bands - 1][..])?;
    }
    write_geo_tags(&mut dir, transform, crs, epsg, nodata)?;
    dir.finish()?;
    Ok(())
}

fn write_geo_tags<W: Write + Seek, K: TiffKind>(
    dir: &mut DirectoryEncoder<'_, W, K>,
    transform: &GeoTransform,
    crs: Crs,
    epsg: u16,
    nodata: Option<f32>,
) -> Result<()> {
    if transform.b == 0.0 && transform.d == 0.0 {
        let scale = [transform.a, -transform.e, 0.0];
        let tiepoint = [0.0, 0.0, 0.0, transform.c, transform.f, 0.0];
        dir.write_tag(Tag::ModelPixelScaleTag, &scale[..])?;
        dir.write_tag(Tag::ModelTiepointTag, &tiepoint[..])?;
    } else {
        let t = transform;
        let matrix = [
            t.a, t.b, 0.0, t.c, //
            t.d, t.e, 0.0, t.f, //
            0.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ];
        dir.write_tag(Tag::ModelTransformationTag, &matrix[..])?;
    }

    let (model_type, crs_key) = if crs.is_geographic() {
        (MODEL_TYPE_GEOGRAPHIC, KEY_GEOGRAPHIC_TYPE)
    } else {
        (MODEL_TYPE_PROJECTED, KEY_PROJECTED_CS_TYPE)
    };
    let keys: [u16; 16] = [
        1, 1, 0, 3, //
        KEY_MODEL_TYPE, 0, 1, model_type, //
        KEY_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA, //
        crs_key, 0, 1, epsg,
    ];
    dir.write_tag(Tag::GeoKeyDirectoryTag, &keys[..])?;

    if let Some(nodata) = nodata {
        dir.write_tag(Tag::GdalNodata, nodata.to_string().as_str())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{s, Array3};

    fn open_tags(path: &Path) -> Decoder<BufReader<File>> {
        Decoder::new(BufReader::new(File::open(path).unwrap())).unwrap()
    }

    #[test]
    fn test_write_then_open_single_band() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tile.tif");
        let data = Array3::from_shape_fn((1, 3, 4), |(_, r, c)| (r * 4 + c) as f32);
        let transform = GeoTransform::north_up(500.0, 1000.0, 10.0, 10.0);

        write(&path, &data, &transform, Crs::WEB_MERCATOR, Some(-9999.0)).unwrap();

        let source = GeoTiffReader.open(&path).unwrap();
        let meta = source.meta();
        assert_eq!((meta.bands, meta.height, meta.width), (1, 3, 4));
        assert_eq!(meta.crs, Crs::WEB_MERCATOR);
        assert_eq!(meta.transform, transform);
        assert_eq!(meta.nodata, Some(-9999.0));
        assert_eq!(meta.bounds(), (500.0, 540.0, 970.0, 1000.0));
        assert_eq!(source.read_all().unwrap(), data);
    }

    #[test]
    fn test_write_then_open_three_bands() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rgb.tif");
        let data = Array3::from_shape_fn((3, 2, 2), |(b, r, c)| (b * 100 + r * 2 + c) as f32);
        let transform = GeoTransform::north_up(-10.0, 5.0, 0.5, 0.5);

        write(&path, &data, &transform, Crs::WGS84, None).unwrap();

        let source = GeoTiffReader.open(&path).unwrap();
        assert_eq!(source.meta().bands, 3);
        assert_eq!(source.meta().crs, Crs::WGS84);
        assert_eq!(source.meta().nodata, None);
        assert_eq!(source.read_all().unwrap(), data);
    }

    #[test]
    fn test_geo_tags_written_under_their_registered_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tags.tif");
        let transform = GeoTransform::north_up(500.0, 1000.0, 10.0, 10.0);
        write(&path, &Array3::zeros((1, 2, 2)), &transform, Crs::WEB_MERCATOR, Some(0.0)).unwrap();

        let mut decoder = open_tags(&path);
        assert_eq!(
            decoder.get_tag_f64_vec(Tag::from_u16_exhaustive(33550)).unwrap(),
            vec![10.0, 10.0, 0.0]
        );
        assert_eq!(
            decoder.get_tag_f64_vec(Tag::from_u16_exhaustive(33922)).unwrap(),
            vec![0.0, 0.0, 0.0, 500.0, 1000.0, 0.0]
        );
        let keys = decoder.get_tag_u16_vec(Tag::from_u16_exhaustive(34735)).unwrap();
        assert_eq!(&keys[12..], &[KEY_PROJECTED_CS_TYPE, 0, 1, 3857]);
        assert!(decoder.find_tag(Tag::from_u16_exhaustive(42113)).unwrap().is_some());
    }

    #[test]
    fn test_band_count_from_samples_per_pixel() {
        let dir = tempfile::tempdir().unwrap();
        let transform = GeoTransform::north_up(0.0, 3.0, 1.0, 1.0);

        for bands in [2, 4, 5] {
            let path = dir.path().join(format!("b{bands}.tif"));
            let data = Array3::from_shape_fn((bands, 3, 3), |(b, r, c)| (b * 10 + r * 3 + c) as f32);
            write(&path, &data, &transform, Crs::WEB_MERCATOR, None).unwrap();

            let source = GeoTiffReader.open(&path).unwrap();
            assert_eq!(source.meta().bands, bands);
            assert_eq!(source.read_all().unwrap(), data);
        }
    }

    #[test]
    fn test_window_read_spans_strips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tall.tif");
        let rows = WRITE_ROWS_PER_STRIP * 2 + 5;
        let data = Array3::from_shape_fn((2, rows, 6), |(b, r, c)| (b * 1000 + r * 6 + c) as f32);
        write(&path, &data, &GeoTransform::north_up(0.0, 100.0, 1.0, 1.0), Crs::WGS84, None).unwrap();

        let source = GeoTiffReader.open(&path).unwrap();
        let rect = PixelRect::new(WRITE_ROWS_PER_STRIP - 2, 1, 4, 3);
        let window = source.read_window(rect).unwrap();
        assert_eq!(
            window,
            data.slice(s![.., rect.row_off..rect.row_end(), rect.col_off..rect.col_end()])
        );

        let last = PixelRect::new(rows - 1, 5, 1, 1);
        assert_eq!(source.read_window(last).unwrap()[[1, 0, 0]], data[[1, rows - 1, 5]]);
    }

    #[test]
    fn test_layout_covering_strips() {
        let layout = ChunkLayout::new(10, 40, 10, 16, 1).unwrap();
        assert_eq!(layout.chunk_count(), 3);

        let indices: Vec<u32> = layout
            .covering(PixelRect::new(14, 0, 4, 10))
            .iter()
            .map(|c| c.index)
            .collect();
        assert_eq!(indices, vec![0, 1]);
        assert!(layout.covering(PixelRect::new(0, 0, 0, 10)).is_empty());
    }

    #[test]
    fn test_layout_covering_planar_tiles() {
        // 3x2 tiles of 16x16 per band, two bands.
        let layout = ChunkLayout::new(40, 20, 16, 16, 2).unwrap();
        assert_eq!(layout.chunk_count(), 12);

        let chunks = layout.covering(PixelRect::new(17, 15, 2, 2));
        let indices: Vec<u32> = chunks.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![3, 4, 9, 10]);
        assert_eq!((chunks[1].row_off, chunks[1].col_off), (16, 16));
        assert_eq!(chunks[2].plane, 1);
    }

    #[test]
    fn test_unsupported_band_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("none.tif");
        let data = Array3::zeros((0, 2, 2));
        let err = write(
            &path,
            &data,
            &GeoTransform::north_up(0.0, 0.0, 1.0, 1.0),
            Crs::WGS84,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, RasterError::UnsupportedBandCount(0)));
    }

    #[test]
    fn test_open_missing_file() {
        let err = GeoTiffReader.open(Path::new("/nonexistent/tile.tif")).unwrap_err();
        assert!(matches!(err, RasterError::Io(_)));
    }

    #[test]
    fn test_open_garbage_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.tif");
        std::fs::write(&path, b"definitely not a tiff").unwrap();
        assert!(GeoTiffReader.open(&path).is_err());
    }
}
