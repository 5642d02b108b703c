use model::{RasterSize, Rgba8};

use crate::ExtractionError;

/// Nearest-neighbour resample that samples each output pixel at the centre of
/// its footprint in the source. Hard pixel edges survive; no colour is ever
/// invented.
pub fn nearest(
    source_size: RasterSize,
    source: &[Rgba8],
    target: RasterSize,
) -> Result<Vec<Rgba8>, ExtractionError> {
    if source.len() != source_size.pixel_count() {
        return Err(ExtractionError::SourceLength {
            expected: source_size.pixel_count(),
            actual: source.len(),
        });
    }
    if source_size == target {
        return Ok(source.to_vec());
    }

    let columns: Vec<usize> = (0..target.width())
        .map(|x| sample_index(x, source_size.width(), target.width()))
        .collect();
    let source_width = source_size.width() as usize;
    let mut out = Vec::with_capacity(target.pixel_count());
    for y in 0..target.height() {
        let row = sample_index(y, source_size.height(), target.height()) * source_width;
        out.extend(columns.iter().map(|&column| source[row + column]));
    }
    Ok(out)
}

fn sample_index(output: u32, source_len: u32, output_len: u32) -> usize {
    let centre = (2 * u64::from(output) + 1) * u64::from(source_len) / (2 * u64::from(output_len));
    centre.min(u64::from(source_len) - 1) as usize
}
