use bytes::{Buf, BufMut};

use crate::error::{Result, bail_malformed_if};
use crate::woff::WOFF2_FORMAT;

/// Offset of `numberOfHMetrics` in the hhea table
const HHEA_NUM_HMETRICS_OFFSET: usize = 34;

#[derive(Debug)]
pub(crate) struct HmtxData {
    num_hmetrics: u16,
    advance_widths: Vec<u16>,
    lsbs: Vec<i16>,
}

/// Read `numberOfHMetrics` from an hhea table
///
/// <https://learn.microsoft.com/en-us/typography/opentype/spec/hhea>
pub(crate) fn read_num_hmetrics(hhea: &[u8]) -> Result<u16> {
    let mut input = hhea
        .get(HHEA_NUM_HMETRICS_OFFSET..)
        .unwrap_or_default();
    Ok(input.try_get_u16()?)
}

/// Decode a WOFF2 transformed hmtx table
///
/// Left side bearings omitted from the transformed table are the `xMin`s of
/// the corresponding glyphs.
///
/// <https://www.w3.org/TR/WOFF2/#hmtx_table_format>
pub(crate) fn decode_hmtx_table(
    mut input: &[u8],
    num_hmetrics: u16,
    x_mins: &[i16],
) -> Result<HmtxData> {
    let num_glyphs = x_mins.len();
    let hmtx_flags = input.try_get_u8()?;
    let has_proportional_lsbs = hmtx_flags & 1 == 0;
    let has_monospace_lsbs = hmtx_flags & 2 == 0;

    bail_malformed_if!(
        hmtx_flags & 0xFC != 0,
        WOFF2_FORMAT,
        "hmtx: illegal flags 0x{hmtx_flags:02X}; bits 2-7 must be 0"
    );
    // you say you transformed but there is little evidence of it
    bail_malformed_if!(
        has_proportional_lsbs && has_monospace_lsbs,
        WOFF2_FORMAT,
        "hmtx: transformed table omits no side bearings"
    );
    // num_glyphs 0 is OK if there is no 'glyf' but cannot then xform 'hmtx'.
    bail_malformed_if!(
        num_hmetrics as usize > num_glyphs,
        WOFF2_FORMAT,
        "hmtx: {num_hmetrics} hmetrics for {num_glyphs} glyphs"
    );
    // "...only one entry need be in the array, but that entry is required."
    bail_malformed_if!(num_hmetrics < 1, WOFF2_FORMAT, "hmtx: no hmetrics");

    let mut advance_widths: Vec<u16> = Vec::with_capacity(num_hmetrics as usize);
    for _ in 0..num_hmetrics {
        advance_widths.push(input.try_get_u16()?);
    }

    // Proportional lsbs and monospace leftSideBearings go into the same Vec
    let mut lsbs: Vec<i16> = Vec::with_capacity(num_glyphs);
    for (i, &x_min) in x_mins.iter().enumerate() {
        let explicit = if i < num_hmetrics as usize {
            has_proportional_lsbs
        } else {
            has_monospace_lsbs
        };
        lsbs.push(if explicit { input.try_get_i16()? } else { x_min });
    }

    Ok(HmtxData {
        num_hmetrics,
        advance_widths,
        lsbs,
    })
}

/// bake me a shiny new hmtx table
pub(crate) fn generate_hmtx_table(hmtx_data: &HmtxData) -> Vec<u8> {
    let num_hmetrics = hmtx_data.num_hmetrics as usize;

    let mut hmtx_table: Vec<u8> = Vec::with_capacity(2 * hmtx_data.lsbs.len() + 2 * num_hmetrics);
    for (i, &lsb) in hmtx_data.lsbs.iter().enumerate() {
        if i < num_hmetrics {
            hmtx_table.put_u16(hmtx_data.advance_widths[i]);
        }
        hmtx_table.put_i16(lsb);
    }
    hmtx_table
}
