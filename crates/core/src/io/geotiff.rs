//! GeoTIFF reading and writing on top of the `tiff` crate
//!
//! Georeferencing is carried by the ModelPixelScale / ModelTiepoint tags,
//! the CRS by the GeoKeyDirectory and nodata by the GDAL_NODATA ASCII tag.
//! Multi-band grids are stored one band per page, with the band label in
//! the page's ImageDescription.

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::io::{check_suffix, RASTER_SUFFIXES};
use crate::raster::{GeoTransform, Raster, RasterBands, RasterElement};
use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor, Read, Seek, Write};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::colortype::{ColorType, Gray32Float, Gray64Float, Gray8};
use tiff::encoder::{TiffEncoder, TiffValue};
use tiff::tags::Tag;
use tracing::debug;

const TAG_PIXEL_SCALE: u16 = 33550;
const TAG_TIEPOINT: u16 = 33922;
const TAG_GEOKEYS: u16 = 34735;
const TAG_GDAL_NODATA: u16 = 42113;

const KEY_MODEL_TYPE: u16 = 1024;
const KEY_RASTER_TYPE: u16 = 1025;
const KEY_GEOGRAPHIC_TYPE: u16 = 2048;
const KEY_PROJECTED_CS_TYPE: u16 = 3072;

const MODEL_PROJECTED: u16 = 1;
const MODEL_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;

fn tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

/// Sample type of written rasters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precision {
    /// 8-bit unsigned, for flow direction and mask grids
    UInt8,
    #[default]
    Float32,
    /// Used for accumulation grids, which exceed f32 integer precision
    Float64,
}

/// Options for writing GeoTIFF files
#[derive(Debug, Clone, Default)]
pub struct GeoTiffOptions {
    pub precision: Precision,
}

impl GeoTiffOptions {
    pub fn with_precision(precision: Precision) -> Self {
        Self { precision }
    }
}

/// Read one band of a GeoTIFF file.
///
/// `band` is zero-based and defaults to the first page.
pub fn read_geotiff<T, P>(path: P, band: Option<usize>) -> Result<Raster<T>>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    check_suffix(path, RASTER_SUFFIXES)?;
    let file = BufReader::new(File::open(path)?);
    debug!("Reading {}", path.display());
    let pages = decode_pages(file, band)?;
    pages
        .into_iter()
        .next()
        .map(|(_, raster)| raster)
        .ok_or_else(|| Error::Other(format!("{} has no band {:?}", path.display(), band)))
}

/// Read a GeoTIFF from an in-memory buffer
pub fn read_geotiff_from_buffer<T>(data: &[u8], band: Option<usize>) -> Result<Raster<T>>
where
    T: RasterElement,
{
    decode_pages(Cursor::new(data), band)?
        .into_iter()
        .next()
        .map(|(_, raster)| raster)
        .ok_or_else(|| Error::Other(format!("buffer has no band {:?}", band)))
}

/// Read every page of a GeoTIFF as a labelled band stack.
///
/// Pages without a stored label are numbered from 1.
pub fn read_geotiff_bands<P: AsRef<Path>>(path: P) -> Result<RasterBands> {
    let path = path.as_ref();
    check_suffix(path, RASTER_SUFFIXES)?;
    let file = BufReader::new(File::open(path)?);
    let pages = decode_pages::<f64, _>(file, None)?;
    debug!("Read {} band(s) from {}", pages.len(), path.display());
    let bands = pages
        .into_iter()
        .enumerate()
        .map(|(i, (label, raster))| (label.unwrap_or_else(|| (i + 1).to_string()), raster))
        .collect();
    RasterBands::from_bands(bands)
}

/// Decode pages; `only` restricts the result to a single zero-based page.
fn decode_pages<T, R>(reader: R, only: Option<usize>) -> Result<Vec<(Option<String>, Raster<T>)>>
where
    T: RasterElement,
    R: Read + Seek,
{
    let mut decoder = Decoder::new(reader)
        .map_err(|e| Error::Other(format!("TIFF decode error: {}", e)))?
        .with_limits(Limits::unlimited());

    let mut pages = Vec::new();
    let mut index = 0usize;
    loop {
        if only.map_or(true, |b| b == index) {
            pages.push(decode_page(&mut decoder)?);
            if only.is_some() {
                break;
            }
        }
        if !decoder.more_images() {
            break;
        }
        decoder
            .next_image()
            .map_err(|e| Error::Other(format!("Cannot advance to page {}: {}", index + 1, e)))?;
        index += 1;
    }
    Ok(pages)
}

fn decode_page<T, R>(decoder: &mut Decoder<R>) -> Result<(Option<String>, Raster<T>)>
where
    T: RasterElement,
    R: Read + Seek,
{
    let (width, height) = decoder
        .dimensions()
        .map_err(|e| Error::Other(format!("Cannot read dimensions: {}", e)))?;
    let rows = height as usize;
    let cols = width as usize;

    let result = decoder
        .read_image()
        .map_err(|e| Error::Other(format!("Cannot read image data: {}", e)))?;

    let data: Vec<T> = match result {
        DecodingResult::F32(buf) => cast_all(buf),
        DecodingResult::F64(buf) => cast_all(buf),
        DecodingResult::U8(buf) => cast_all(buf),
        DecodingResult::U16(buf) => cast_all(buf),
        DecodingResult::U32(buf) => cast_all(buf),
        DecodingResult::I8(buf) => cast_all(buf),
        DecodingResult::I16(buf) => cast_all(buf),
        DecodingResult::I32(buf) => cast_all(buf),
        DecodingResult::U64(buf) => cast_all(buf),
        DecodingResult::I64(buf) => cast_all(buf),
    };

    if data.len() != rows * cols {
        return Err(Error::UnsupportedDataType(format!(
            "expected one sample per pixel, got {} samples for {}x{}",
            data.len(),
            rows,
            cols
        )));
    }

    let mut raster = Raster::from_vec(data, rows, cols)?;
    if let Some(transform) = read_geotransform(decoder) {
        raster.set_transform(transform);
    }
    raster.set_crs(read_crs(decoder));
    let nodata = read_nodata::<T, R>(decoder);
    raster.set_nodata(nodata);
    // The declared sentinel stays in the metadata; float cells carry NaN in memory
    if T::is_float() {
        if let Some(nd) = nodata.filter(|v| v.as_f64().is_some_and(|f| !f.is_nan())) {
            let nan = T::default_nodata();
            raster
                .data_mut()
                .mapv_inplace(|v| if v.is_nodata(Some(nd)) { nan } else { v });
        }
    }

    let label = decoder
        .get_tag_ascii_string(Tag::ImageDescription)
        .ok()
        .map(|s| s.trim_end_matches('\0').to_string())
        .filter(|s| !s.is_empty());

    Ok((label, raster))
}

fn cast_all<S: num_traits::NumCast + Copy, T: RasterElement>(buf: Vec<S>) -> Vec<T> {
    buf.into_iter()
        .map(|v| num_traits::cast(v).unwrap_or_else(T::default_nodata))
        .collect()
}

fn read_geotransform<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<GeoTransform> {
    let scale = decoder.get_tag_f64_vec(tag(TAG_PIXEL_SCALE)).ok()?;
    let tiepoint = decoder.get_tag_f64_vec(tag(TAG_TIEPOINT)).ok()?;

    if scale.len() < 2 || tiepoint.len() < 6 {
        return None;
    }
    // tiepoint: [I, J, K, X, Y, Z], scale: [ScaleX, ScaleY, ScaleZ]
    let origin_x = tiepoint[3] - tiepoint[0] * scale[0];
    let origin_y = tiepoint[4] + tiepoint[1] * scale[1];
    Some(GeoTransform::new(origin_x, origin_y, scale[0], -scale[1]))
}

fn read_crs<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<CRS> {
    let keys = decoder.get_tag_u16_vec(tag(TAG_GEOKEYS)).ok()?;
    if keys.len() < 4 {
        return None;
    }
    let count = keys[3] as usize;
    let entries = keys[4..].chunks_exact(4).take(count);

    let mut projected = None;
    let mut geographic = None;
    for entry in entries {
        // Only keys stored inline (location 0) carry EPSG codes
        if entry[1] != 0 {
            continue;
        }
        match entry[0] {
            KEY_PROJECTED_CS_TYPE => projected = Some(entry[3]),
            KEY_GEOGRAPHIC_TYPE => geographic = Some(entry[3]),
            _ => {}
        }
    }
    // 32767 is "user defined"
    projected
        .or(geographic)
        .filter(|&code| code != 0 && code != 32767)
        .map(|code| CRS::from_epsg(code as u32))
}

fn read_nodata<T: RasterElement, R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<T> {
    let text = decoder.get_tag_ascii_string(tag(TAG_GDAL_NODATA)).ok()?;
    let text = text.trim_end_matches('\0').trim();
    let value: f64 = match text.to_ascii_lowercase().as_str() {
        "nan" | "-nan" => f64::NAN,
        other => other.parse().ok()?,
    };
    T::from_f64(value)
}

/// Write a single-band raster.
///
/// Overwrites `path` unconditionally; use [`save_raster`] for the checked
/// variant.
pub fn write_geotiff<T, P>(raster: &Raster<T>, path: P, options: Option<GeoTiffOptions>) -> Result<()>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    check_suffix(path, RASTER_SUFFIXES)?;
    let mut writer = BufWriter::new(File::create(path)?);
    encode_pages(&[(None, raster)], &mut writer, options.unwrap_or_default())?;
    writer.flush()?;
    debug!("Wrote {}", path.display());
    Ok(())
}

/// Write a single-band raster into an in-memory buffer
pub fn write_geotiff_to_buffer<T>(raster: &Raster<T>, options: Option<GeoTiffOptions>) -> Result<Vec<u8>>
where
    T: RasterElement,
{
    let mut buf = Vec::new();
    encode_pages(&[(None, raster)], Cursor::new(&mut buf), options.unwrap_or_default())?;
    Ok(buf)
}

/// Write a band stack, one page per band
pub fn write_geotiff_bands<P: AsRef<Path>>(
    bands: &RasterBands,
    path: P,
    options: Option<GeoTiffOptions>,
) -> Result<()> {
    let path = path.as_ref();
    check_suffix(path, RASTER_SUFFIXES)?;
    let pages: Vec<(Option<&str>, &Raster<f64>)> =
        bands.iter().map(|(label, band)| (Some(label), band)).collect();
    let mut writer = BufWriter::new(File::create(path)?);
    encode_pages(&pages, &mut writer, options.unwrap_or_default())?;
    writer.flush()?;
    debug!("Wrote {} band(s) to {}", bands.len(), path.display());
    Ok(())
}

/// Write a raster, refusing to replace an existing file unless `overwrite`
pub fn save_raster<T, P>(
    raster: &Raster<T>,
    path: P,
    overwrite: bool,
    options: Option<GeoTiffOptions>,
) -> Result<()>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    ensure_writable(path, overwrite)?;
    write_geotiff(raster, path, options)
}

/// Band-stack counterpart of [`save_raster`]
pub fn save_bands<P: AsRef<Path>>(
    bands: &RasterBands,
    path: P,
    overwrite: bool,
    options: Option<GeoTiffOptions>,
) -> Result<()> {
    let path = path.as_ref();
    ensure_writable(path, overwrite)?;
    write_geotiff_bands(bands, path, options)
}

fn ensure_writable(path: &Path, overwrite: bool) -> Result<()> {
    check_suffix(path, RASTER_SUFFIXES)?;
    if path.exists() && !overwrite {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("{} exists and overwrite is disabled", path.display()),
        )));
    }
    Ok(())
}

fn encode_pages<T, W>(pages: &[(Option<&str>, &Raster<T>)], writer: W, options: GeoTiffOptions) -> Result<()>
where
    T: RasterElement,
    W: Write + Seek,
{
    let mut encoder =
        TiffEncoder::new(writer).map_err(|e| Error::Other(format!("TIFF encoder error: {}", e)))?;

    // Float pages write nodata cells as the declared sentinel, NaN when none is set
    for &(label, raster) in pages {
        let sentinel = raster
            .nodata()
            .and_then(|v| v.as_f64())
            .unwrap_or(f64::NAN);
        match options.precision {
            Precision::UInt8 => {
                let fill: u8 = num_traits::cast(sentinel).unwrap_or(u8::MAX);
                let data: Vec<u8> = raster
                    .data()
                    .iter()
                    .map(|&v| {
                        if raster.is_nodata(v) {
                            fill
                        } else {
                            num_traits::cast(v).unwrap_or(fill)
                        }
                    })
                    .collect();
                let nodata = raster.nodata().map(|_| f64::from(fill));
                encode_page::<Gray8, _>(&mut encoder, raster, label, nodata, &data)?;
            }
            Precision::Float32 => {
                let data: Vec<f32> = raster
                    .data()
                    .iter()
                    .map(|&v| {
                        if raster.is_nodata(v) {
                            sentinel as f32
                        } else {
                            num_traits::cast(v).unwrap_or(sentinel as f32)
                        }
                    })
                    .collect();
                let nodata = Some(sentinel);
                encode_page::<Gray32Float, _>(&mut encoder, raster, label, nodata, &data)?;
            }
            Precision::Float64 => {
                let data: Vec<f64> = raster
                    .data()
                    .iter()
                    .map(|&v| {
                        if raster.is_nodata(v) {
                            sentinel
                        } else {
                            v.as_f64().unwrap_or(sentinel)
                        }
                    })
                    .collect();
                let nodata = Some(sentinel);
                encode_page::<Gray64Float, _>(&mut encoder, raster, label, nodata, &data)?;
            }
        }
    }
    Ok(())
}

fn encode_page<C, W>(
    encoder: &mut TiffEncoder<W>,
    raster: &Raster<impl RasterElement>,
    label: Option<&str>,
    nodata: Option<f64>,
    data: &[C::Inner],
) -> Result<()>
where
    C: ColorType,
    [C::Inner]: TiffValue,
    W: Write + Seek,
{
    let (rows, cols) = raster.shape();
    let mut image = encoder
        .new_image::<C>(cols as u32, rows as u32)
        .map_err(|e| Error::Other(format!("Cannot create TIFF image: {}", e)))?;

    let gt = raster.transform();
    let tag_err = |e: tiff::TiffError| Error::Other(format!("Cannot write GeoTIFF tag: {}", e));

    let scale = [gt.pixel_width, gt.pixel_height.abs(), 0.0];
    image
        .encoder()
        .write_tag(tag(TAG_PIXEL_SCALE), &scale[..])
        .map_err(tag_err)?;

    let tiepoint = [0.0, 0.0, 0.0, gt.origin_x, gt.origin_y, 0.0];
    image
        .encoder()
        .write_tag(tag(TAG_TIEPOINT), &tiepoint[..])
        .map_err(tag_err)?;

    let geokeys = geokey_directory(raster.crs());
    image
        .encoder()
        .write_tag(tag(TAG_GEOKEYS), &geokeys[..])
        .map_err(tag_err)?;

    if let Some(nodata) = nodata {
        let text = if nodata.is_nan() {
            "nan".to_string()
        } else {
            nodata.to_string()
        };
        image
            .encoder()
            .write_tag(tag(TAG_GDAL_NODATA), text.as_str())
            .map_err(tag_err)?;
    }

    if let Some(label) = label {
        image
            .encoder()
            .write_tag(Tag::ImageDescription, label)
            .map_err(tag_err)?;
    }

    image
        .write_data(data)
        .map_err(|e| Error::Other(format!("Cannot write image data: {}", e)))?;
    Ok(())
}

/// GeoKeyDirectory with model type, raster type and the EPSG code if known
fn geokey_directory(crs: Option<&CRS>) -> Vec<u16> {
    let mut entries: Vec<[u16; 4]> = Vec::new();
    match crs {
        Some(crs) if crs.is_geographic() => {
            entries.push([KEY_MODEL_TYPE, 0, 1, MODEL_GEOGRAPHIC]);
            entries.push([KEY_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA]);
            entries.push([KEY_GEOGRAPHIC_TYPE, 0, 1, 4326]);
        }
        Some(crs) => {
            entries.push([KEY_MODEL_TYPE, 0, 1, MODEL_PROJECTED]);
            entries.push([KEY_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA]);
            if let Some(code) = crs.epsg().and_then(|c| u16::try_from(c).ok()) {
                entries.push([KEY_PROJECTED_CS_TYPE, 0, 1, code]);
            }
        }
        None => {
            entries.push([KEY_MODEL_TYPE, 0, 1, MODEL_PROJECTED]);
            entries.push([KEY_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA]);
        }
    }
    let mut keys = vec![1, 1, 0, entries.len() as u16];
    keys.extend(entries.into_iter().flatten());
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> Raster<f64> {
        let mut r = Raster::from_vec(vec![1.0, 2.0, f64::NAN, 4.0, 5.0, 6.0], 2, 3).unwrap();
        r.set_transform(GeoTransform::new(-1_000.0, 2_000.0, 30.0, -30.0));
        r.set_crs(Some(CRS::conus_albers()));
        r.set_nodata(Some(f64::NAN));
        r
    }

    #[test]
    fn test_georeferencing_survives_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("param.tif");
        write_geotiff(&sample(), &path, None).unwrap();

        let back: Raster<f64> = read_geotiff(&path, None).unwrap();
        assert_eq!(back.shape(), (2, 3));
        assert!(back.transform().same_grid(sample().transform()));
        assert_eq!(back.crs().and_then(|c| c.epsg()), Some(5070));
        assert!(back.get(0, 2).unwrap().is_nan());
        assert!(back.is_nodata(back.get(0, 2).unwrap()));
        assert_eq!(back.get(1, 2).unwrap(), 6.0);
    }

    #[test]
    fn test_fdr_written_as_bytes_keeps_nodata() {
        let mut fdr = Raster::from_vec(vec![1u8, 2, 255, 64], 2, 2).unwrap();
        fdr.set_nodata(Some(255));
        let buf = write_geotiff_to_buffer(&fdr, Some(GeoTiffOptions::with_precision(Precision::UInt8))).unwrap();
        let back: Raster<u8> = read_geotiff_from_buffer(&buf, None).unwrap();
        assert_eq!(back.nodata(), Some(255));
        assert_eq!(back.get(1, 1).unwrap(), 64);
    }

    #[test]
    fn test_bands_keep_labels() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("monthly.tif");
        let base = sample();
        let mut bands = RasterBands::single("2020-01", base.clone());
        bands.push("2020-02", base.map(Some(f64::NAN), |v| v * 10.0)).unwrap();
        write_geotiff_bands(&bands, &path, Some(GeoTiffOptions::with_precision(Precision::Float64))).unwrap();

        let back = read_geotiff_bands(&path).unwrap();
        assert_eq!(back.labels(), bands.labels());
        assert_eq!(back.band(1).unwrap().get(1, 0).unwrap(), 40.0);

        let second: Raster<f64> = read_geotiff(&path, Some(1)).unwrap();
        assert_eq!(second.get(0, 0).unwrap(), 10.0);
    }

    #[test]
    fn test_save_refuses_overwrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fcpg.tif");
        save_raster(&sample(), &path, false, None).unwrap();

        match save_raster(&sample(), &path, false, None) {
            Err(Error::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::AlreadyExists),
            other => panic!("expected AlreadyExists, got {:?}", other.map(|_| ())),
        }
        save_raster(&sample(), &path, true, None).unwrap();
    }

    fn plain_tiff<C>(data: &[C::Inner]) -> Vec<u8>
    where
        C: ColorType,
        [C::Inner]: TiffValue,
    {
        let mut buf = Vec::new();
        let mut encoder = TiffEncoder::new(Cursor::new(&mut buf)).unwrap();
        encoder.write_image::<C>(2, 1, data).unwrap();
        buf
    }

    #[test]
    fn test_integer_sample_formats() {
        use tiff::encoder::colortype::{Gray16, Gray32, GrayI16, GrayI32, GrayI8};

        let cases = [
            plain_tiff::<Gray8>(&[3, 200]),
            plain_tiff::<Gray16>(&[3, 200]),
            plain_tiff::<Gray32>(&[3, 200]),
            plain_tiff::<GrayI8>(&[3, -100]),
            plain_tiff::<GrayI16>(&[3, -100]),
            plain_tiff::<GrayI32>(&[3, -100]),
        ];
        for (i, buf) in cases.iter().enumerate() {
            let r: Raster<f64> = read_geotiff_from_buffer(buf, None).unwrap();
            assert_eq!(r.shape(), (1, 2));
            assert_eq!(r.get(0, 0).unwrap(), 3.0);
            let expected = if i < 3 { 200.0 } else { -100.0 };
            assert_eq!(r.get(0, 1).unwrap(), expected);
        }

        // Out-of-range samples fall back to the element nodata
        let r: Raster<u8> = read_geotiff_from_buffer(&cases[3], None).unwrap();
        assert_eq!(r.get(0, 0).unwrap(), 3);
        assert_eq!(r.get(0, 1).unwrap(), u8::default_nodata());
    }

    #[test]
    fn test_declared_sentinel_round_trips() {
        let mut r = Raster::from_vec(vec![1.5, -9999.0, 4.0, 8.0], 2, 2).unwrap();
        r.set_nodata(Some(-9999.0));
        let dir = tempdir().unwrap();
        let path = dir.path().join("dem.tif");
        write_geotiff(&r, &path, None).unwrap();

        let back: Raster<f64> = read_geotiff(&path, None).unwrap();
        assert_eq!(back.nodata(), Some(-9999.0));
        assert!(back.get(0, 1).unwrap().is_nan());
        assert_eq!(back.get(0, 0).unwrap(), 1.5);

        // Written again, the file still declares -9999 rather than NaN
        let buf = write_geotiff_to_buffer(&back, Some(GeoTiffOptions::with_precision(Precision::Float64))).unwrap();
        let again: Raster<f64> = read_geotiff_from_buffer(&buf, None).unwrap();
        assert_eq!(again.nodata(), Some(-9999.0));
        assert!(again.is_nodata(again.get(0, 1).unwrap()));
        assert_eq!(again.get(1, 1).unwrap(), 8.0);
    }

    #[test]
    fn test_rejects_other_suffixes() {
        let dir = tempdir().unwrap();
        let err = write_geotiff(&sample(), dir.path().join("out.nc"), None).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat { .. }));
    }
}
