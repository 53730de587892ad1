use arrayvec::ArrayVec;
use bytes::{Buf, BufMut};

use crate::error::{Error, Result, bail_if, bail_malformed_if, u32_will_overflow, usize_will_overflow};
use crate::variable_length::BufVariableExt as _;
use crate::woff::WOFF2_FORMAT;

// simple glyph flags
const GLYF_ON_CURVE: u8 = 1 << 0;
const GLYF_X_SHORT: u8 = 1 << 1;
const GLYF_Y_SHORT: u8 = 1 << 2;
const GLYF_REPEAT: u8 = 1 << 3;
const GLYF_THIS_X_IS_SAME: u8 = 1 << 4;
const GLYF_THIS_Y_IS_SAME: u8 = 1 << 5;
const OVERLAP_SIMPLE: u8 = 1 << 6;

const NUM_SUB_STREAMS: usize = 7;
const FLAG_OVERLAP_SIMPLE_BITMAP: u16 = 1 << 0;
// 98% of Google Fonts have no glyph above 5k bytes. Largest glyph ever observed was 72k bytes
const DEFAULT_GLYPH_BUF_SIZE: usize = 5120;

// composite glyph flags
const FLAG_ARG_1_AND_2_ARE_WORDS: u16 = 1 << 0;
const FLAG_WE_HAVE_A_SCALE: u16 = 1 << 3;
const FLAG_MORE_COMPONENTS: u16 = 1 << 5;
const FLAG_WE_HAVE_AN_X_AND_Y_SCALE: u16 = 1 << 6;
const FLAG_WE_HAVE_A_TWO_BY_TWO: u16 = 1 << 7;
const FLAG_WE_HAVE_INSTRUCTIONS: u16 = 1 << 8;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct Point {
    x: i32,
    y: i32,
    on_curve: bool,
}

pub(crate) struct GlyfAndLocaData {
    pub num_glyphs: u16,
    /// loca index format
    pub index_format: u16,
    /// The x_min of the bounding box of each glyph (0 for glyphs without
    /// contours). Used to reconstruct the hmtx table.
    pub x_mins: Vec<i16>,
    pub glyf_table: Vec<u8>,
    pub loca_table: Vec<u8>,
}

/// Decode a WOFF2 transformed glyf table into glyf and loca tables
///
/// <https://www.w3.org/TR/WOFF2/#glyf_table_format>
pub(crate) fn transform_glyf_table(data: &[u8]) -> Result<GlyfAndLocaData> {
    GlyfDecoder::new(data)?.transform()
}

struct GlyfDecoder<'a> {
    n_contour_stream: &'a [u8],
    n_points_stream: &'a [u8],
    flag_stream: &'a [u8],
    glyph_stream: &'a [u8],
    composite_stream: &'a [u8],
    bbox_bitmap: &'a [u8],
    bbox_stream: &'a [u8],
    instruction_stream: &'a [u8],
    overlap_bitmap: Option<&'a [u8]>,
    /// Scratch buffer each glyph is decoded into
    glyph_buf: Vec<u8>,

    num_glyphs: u16,
    index_format: u16,
}

fn bit_is_set(bitmap: &[u8], index: usize) -> bool {
    bitmap[index >> 3] & (0x80 >> (index & 7)) != 0
}

impl<'a> GlyfDecoder<'a> {
    fn new(data: &'a [u8]) -> Result<Self> {
        let mut input = data;
        let _reserved = input.try_get_u16()?;
        let flags = input.try_get_u16()?;
        let has_overlap_bitmap = flags & FLAG_OVERLAP_SIMPLE_BITMAP != 0;
        let num_glyphs = input.try_get_u16()?;
        let index_format = input.try_get_u16()?;
        bail_malformed_if!(
            index_format > 1,
            WOFF2_FORMAT,
            "glyf: invalid indexFormat {index_format}"
        );

        let mut offset: usize = (2 + NUM_SUB_STREAMS) * 4;
        bail_if!(
            offset > data.len(),
            Error::malformed(WOFF2_FORMAT, "glyf: truncated header")
        );

        // Invariant from here on: data.len() >= offset
        let mut substreams: ArrayVec<&[u8], NUM_SUB_STREAMS> = ArrayVec::new();
        for _ in 0..NUM_SUB_STREAMS {
            let substream_size = input.try_get_u32()? as usize;
            bail_malformed_if!(
                substream_size > data.len() - offset,
                WOFF2_FORMAT,
                "glyf: sub-stream of {substream_size} bytes overruns the table"
            );
            substreams.push(&data[offset..offset + substream_size]);
            offset += substream_size;
        }

        let bitmap_length: usize = ((num_glyphs as usize + 31) >> 5) << 2;
        bail_malformed_if!(
            bitmap_length > substreams[5].len(),
            WOFF2_FORMAT,
            "glyf: bbox stream is shorter than its bitmap"
        );
        let (bbox_bitmap, bbox_stream) = substreams[5].split_at(bitmap_length);

        let overlap_bitmap = if has_overlap_bitmap {
            let overlap_bitmap_length = (num_glyphs as usize + 7) >> 3;
            bail_malformed_if!(
                overlap_bitmap_length > data.len() - offset,
                WOFF2_FORMAT,
                "glyf: truncated overlap bitmap"
            );
            Some(&data[offset..offset + overlap_bitmap_length])
        } else {
            None
        };

        Ok(GlyfDecoder {
            n_contour_stream: substreams[0],
            n_points_stream: substreams[1],
            flag_stream: substreams[2],
            glyph_stream: substreams[3],
            composite_stream: substreams[4],
            bbox_bitmap,
            bbox_stream,
            instruction_stream: substreams[6],
            overlap_bitmap,
            glyph_buf: Vec::with_capacity(DEFAULT_GLYPH_BUF_SIZE),
            num_glyphs,
            index_format,
        })
    }

    fn transform(mut self) -> Result<GlyfAndLocaData> {
        let num_glyphs = self.num_glyphs as usize;
        let mut glyf_table: Vec<u8> = Vec::with_capacity(num_glyphs * 12);
        let mut loca_values: Vec<u32> = Vec::with_capacity(num_glyphs + 1);
        let mut x_mins: Vec<i16> = vec![0; num_glyphs];

        for i in 0..num_glyphs {
            loca_values.push(glyf_offset(&glyf_table)?);

            let n_contours = self.n_contour_stream.try_get_i16()?;
            let glyph_has_bbox = bit_is_set(self.bbox_bitmap, i);

            self.glyph_buf.clear();
            match n_contours {
                -1 => {
                    bail_malformed_if!(
                        !glyph_has_bbox,
                        WOFF2_FORMAT,
                        "glyf: composite glyph {i} has no bbox"
                    );
                    self.parse_composite_glyph()?;
                }
                0 => {
                    bail_malformed_if!(
                        glyph_has_bbox,
                        WOFF2_FORMAT,
                        "glyf: empty glyph {i} has a bbox"
                    );
                }
                n if n > 0 => {
                    let has_overlap_bit = self
                        .overlap_bitmap
                        .is_some_and(|bitmap| bit_is_set(bitmap, i));
                    self.parse_simple_glyph(n as usize, glyph_has_bbox, has_overlap_bit)?;
                    // xMin is bytes 2..4 of the glyph header
                    x_mins[i] = i16::from_be_bytes([self.glyph_buf[2], self.glyph_buf[3]]);
                }
                n => {
                    return Err(Error::malformed(
                        WOFF2_FORMAT,
                        format!("glyf: glyph {i} has {n} contours"),
                    ));
                }
            }

            glyf_table.extend_from_slice(&self.glyph_buf);
            glyf_table.resize(Round4!(glyf_table.len()), 0);
        }

        // loca[n] will be equal the length of the glyph data ('glyf') table
        loca_values.push(glyf_offset(&glyf_table)?);

        let loca_table = generate_loca_table(&loca_values, self.index_format)?;
        log::trace!(
            "WOFF2 glyf: {} glyphs, {} bytes of glyf, {} bytes of loca",
            self.num_glyphs,
            glyf_table.len(),
            loca_table.len()
        );

        Ok(GlyfAndLocaData {
            num_glyphs: self.num_glyphs,
            index_format: self.index_format,
            x_mins,
            glyf_table,
            loca_table,
        })
    }

    /// Decode a composite glyph into `self.glyph_buf`
    fn parse_composite_glyph(&mut self) -> Result<()> {
        // Measure on a copy of the stream so the bytes counted here can then be copied below.
        let mut ro_composite_stream = self.composite_stream;
        let (composite_size, have_instructions) =
            compute_size_of_composite(&mut ro_composite_stream)?;

        let instruction_size: u16 = if have_instructions {
            self.glyph_stream.try_get_variable_255_u16()?
        } else {
            0
        };

        self.glyph_buf
            .reserve(12 + composite_size + instruction_size as usize);

        // All composite glyphs have n_contours = -1
        self.glyph_buf.put_i16(-1);
        self.bbox_stream
            .try_read_bytes_into(8, &mut self.glyph_buf)?;
        self.composite_stream
            .try_read_bytes_into(composite_size, &mut self.glyph_buf)?;

        if have_instructions {
            self.glyph_buf.put_u16(instruction_size);
            self.instruction_stream
                .try_read_bytes_into(instruction_size as usize, &mut self.glyph_buf)?;
        }

        Ok(())
    }

    /// Decode a simple glyph into `self.glyph_buf`
    fn parse_simple_glyph(
        &mut self,
        n_contours: usize,
        glyph_has_bbox: bool,
        has_overlap_bit: bool,
    ) -> Result<()> {
        let mut n_points_vec: Vec<u16> = Vec::with_capacity(n_contours);
        let mut total_n_points: u32 = 0;
        for _ in 0..n_contours {
            let n_points_contour = self.n_points_stream.try_get_variable_255_u16()?;
            bail_if!(
                u32_will_overflow(total_n_points, n_points_contour as u32),
                Error::malformed(WOFF2_FORMAT, "glyf: point count overflows")
            );
            n_points_vec.push(n_points_contour);
            total_n_points += n_points_contour as u32;
        }

        let flag_size = total_n_points as usize;
        bail_malformed_if!(
            flag_size > self.flag_stream.len(),
            WOFF2_FORMAT,
            "glyf: flag stream is exhausted"
        );
        let (flags, rest) = self.flag_stream.split_at(flag_size);
        self.flag_stream = rest;

        let mut points = Vec::with_capacity(flag_size);
        let triplet_bytes_consumed = decode_triplet(flags, self.glyph_stream, &mut points)?;
        self.glyph_stream.advance(triplet_bytes_consumed);

        let instruction_size = self.glyph_stream.try_get_variable_255_u16()?;
        bail_malformed_if!(
            total_n_points >= (1 << 27),
            WOFF2_FORMAT,
            "glyf: implausible point count {total_n_points}"
        );

        self.glyph_buf.reserve(
            12 + 2 * n_contours + 5 * (total_n_points as usize) + (instruction_size as usize),
        );

        self.glyph_buf.put_i16(n_contours as i16);

        if glyph_has_bbox {
            self.bbox_stream
                .try_read_bytes_into(8, &mut self.glyph_buf)?;
        } else {
            write_bbox(&points, &mut self.glyph_buf);
        }

        let mut end_point: i32 = -1;
        for n_points_contour in n_points_vec {
            end_point += n_points_contour as i32;
            bail_malformed_if!(
                end_point >= 65536,
                WOFF2_FORMAT,
                "glyf: contour end point out of range"
            );
            self.glyph_buf.put_u16(end_point as u16);
        }

        self.glyph_buf.put_u16(instruction_size);
        self.instruction_stream
            .try_read_bytes_into(instruction_size as usize, &mut self.glyph_buf)?;

        write_glyph_points(&points, has_overlap_bit, &mut self.glyph_buf);

        Ok(())
    }
}

fn glyf_offset(glyf_table: &[u8]) -> Result<u32> {
    u32::try_from(glyf_table.len())
        .map_err(|_| Error::malformed(WOFF2_FORMAT, "glyf: reconstructed table exceeds 4GiB"))
}

fn point_flag(dx: i32, dy: i32, on_curve: bool) -> u8 {
    let mut flag: u8 = if on_curve { GLYF_ON_CURVE } else { 0 };

    if dx == 0 {
        flag |= GLYF_THIS_X_IS_SAME;
    } else if dx > -256 && dx < 256 {
        flag |= GLYF_X_SHORT | if dx > 0 { GLYF_THIS_X_IS_SAME } else { 0 };
    }

    if dy == 0 {
        flag |= GLYF_THIS_Y_IS_SAME;
    } else if dy > -256 && dy < 256 {
        flag |= GLYF_Y_SHORT | if dy > 0 { GLYF_THIS_Y_IS_SAME } else { 0 };
    }

    flag
}

/// Write a flag that applies to `repeat + 1` consecutive points
fn write_flag(dst: &mut impl BufMut, flag: u8, repeat: u8) {
    if repeat > 0 {
        dst.put_u8(flag | GLYF_REPEAT);
        dst.put_u8(repeat);
    } else {
        dst.put_u8(flag);
    }
}

/// Write the flags and coordinates of a simple glyph
fn write_glyph_points(points: &[Point], has_overlap_bit: bool, dst: &mut impl BufMut) {
    // Flags are run-length encoded, so a flag is only written once the next
    // one is known to differ (or the run reaches 255 repeats).
    let mut pending: Option<(u8, u8)> = None;
    let mut last = (0, 0);
    for (i, point) in points.iter().enumerate() {
        let mut flag = point_flag(point.x - last.0, point.y - last.1, point.on_curve);
        if has_overlap_bit && i == 0 {
            flag |= OVERLAP_SIMPLE;
        }
        pending = match pending {
            Some((last_flag, repeat)) if last_flag == flag && repeat < 255 => {
                Some((last_flag, repeat + 1))
            }
            previous => {
                if let Some((last_flag, repeat)) = previous {
                    write_flag(dst, last_flag, repeat);
                }
                Some((flag, 0))
            }
        };
        last = (point.x, point.y);
    }
    if let Some((last_flag, repeat)) = pending {
        write_flag(dst, last_flag, repeat);
    }

    let mut last_x: i32 = 0;
    for point in points {
        let dx = point.x - last_x;
        if dx == 0 {
            // implied by the flag
        } else if dx > -256 && dx < 256 {
            dst.put_u8(dx.unsigned_abs() as u8);
        } else {
            // will always fit for valid input, but overflow is harmless
            dst.put_i16(dx as i16);
        }
        last_x = point.x;
    }

    let mut last_y: i32 = 0;
    for point in points {
        let dy = point.y - last_y;
        if dy == 0 {
            // implied by the flag
        } else if dy > -256 && dy < 256 {
            dst.put_u8(dy.unsigned_abs() as u8);
        } else {
            dst.put_i16(dy as i16);
        }
        last_y = point.y;
    }
}

/// Compute the bounding box of the coordinates, and write it to `dst`
fn write_bbox(points: &[Point], dst: &mut impl BufMut) {
    let (mut x_min, mut y_min, mut x_max, mut y_max) = match points.first() {
        Some(p) => (p.x, p.y, p.x, p.y),
        None => (0, 0, 0, 0),
    };
    for &Point { x, y, .. } in points.iter().skip(1) {
        x_min = x.min(x_min);
        x_max = x.max(x_max);
        y_min = y.min(y_min);
        y_max = y.max(y_max);
    }

    dst.put_i16(x_min as i16);
    dst.put_i16(y_min as i16);
    dst.put_i16(x_max as i16);
    dst.put_i16(y_max as i16);
}

/// Size in bytes of the composite glyph records at the start of `composite_stream`,
/// and whether any of them has instructions.
fn compute_size_of_composite(composite_stream: &mut impl Buf) -> Result<(usize, bool)> {
    let mut bytes_read: usize = 0;
    let mut we_have_instructions = false;
    let mut flags: u16 = FLAG_MORE_COMPONENTS;
    while flags & FLAG_MORE_COMPONENTS != 0 {
        flags = composite_stream.try_get_u16()?;
        we_have_instructions |= flags & FLAG_WE_HAVE_INSTRUCTIONS != 0;
        // glyph index
        let mut arg_size: usize = 2;
        if flags & FLAG_ARG_1_AND_2_ARE_WORDS != 0 {
            arg_size += 4;
        } else {
            arg_size += 2;
        }
        if flags & FLAG_WE_HAVE_A_SCALE != 0 {
            arg_size += 2;
        } else if flags & FLAG_WE_HAVE_AN_X_AND_Y_SCALE != 0 {
            arg_size += 4;
        } else if flags & FLAG_WE_HAVE_A_TWO_BY_TWO != 0 {
            arg_size += 8;
        }
        composite_stream.try_advance(arg_size)?;

        bytes_read += 2 + arg_size;
    }

    Ok((bytes_read, we_have_instructions))
}

/// Decode the triplet-encoded coordinates of `flags_in.len()` points from `in_`,
/// returning the number of bytes of `in_` consumed.
///
/// <https://www.w3.org/TR/WOFF2/#triplet_decoding>
fn decode_triplet(flags_in: &[u8], in_: &[u8], result: &mut Vec<Point>) -> Result<usize> {
    #[inline(always)]
    fn with_sign(flag: i32, baseval: i32) -> i32 {
        // Precondition: 0 <= baseval < 65536 (to avoid integer overflow)
        if flag & 1 != 0 { baseval } else { -baseval }
    }

    fn safe_add(a: i32, b: i32) -> Result<i32> {
        a.checked_add(b)
            .ok_or_else(|| Error::malformed(WOFF2_FORMAT, "glyf: coordinate overflows"))
    }

    let mut x: i32 = 0;
    let mut y: i32 = 0;

    // every point takes at least one byte
    bail_malformed_if!(
        flags_in.len() > in_.len(),
        WOFF2_FORMAT,
        "glyf: glyph stream is exhausted"
    );

    let mut triplet_index: usize = 0;

    for &flag in flags_in {
        let on_curve = (flag >> 7) == 0;
        let flag = (flag & 0x7f) as i32;

        let n_data_bytes: usize = if flag < 84 {
            1
        } else if flag < 120 {
            2
        } else if flag < 124 {
            3
        } else {
            4
        };

        bail_malformed_if!(
            usize_will_overflow(triplet_index, n_data_bytes)
                || triplet_index + n_data_bytes > in_.len(),
            WOFF2_FORMAT,
            "glyf: glyph stream is exhausted"
        );
        let data = &in_[triplet_index..triplet_index + n_data_bytes];

        let (dx, dy) = if flag < 10 {
            (0, with_sign(flag, ((flag & 14) << 7) + data[0] as i32))
        } else if flag < 20 {
            (
                with_sign(flag, (((flag - 10) & 14) << 7) + data[0] as i32),
                0,
            )
        } else if flag < 84 {
            let b0 = flag - 20;
            let b1 = data[0] as i32;
            (
                with_sign(flag, 1 + (b0 & 0x30) + (b1 >> 4)),
                with_sign(flag >> 1, 1 + ((b0 & 0x0c) << 2) + (b1 & 0x0f)),
            )
        } else if flag < 120 {
            let b0 = flag - 84;
            (
                with_sign(flag, 1 + ((b0 / 12) << 8) + data[0] as i32),
                with_sign(flag >> 1, 1 + (((b0 % 12) >> 2) << 8) + data[1] as i32),
            )
        } else if flag < 124 {
            let b2 = data[1] as i32;
            (
                with_sign(flag, ((data[0] as i32) << 4) + (b2 >> 4)),
                with_sign(flag >> 1, ((b2 & 0x0f) << 8) + data[2] as i32),
            )
        } else {
            (
                with_sign(flag, ((data[0] as i32) << 8) + data[1] as i32),
                with_sign(flag >> 1, ((data[2] as i32) << 8) + data[3] as i32),
            )
        };
        triplet_index += n_data_bytes;
        x = safe_add(x, dx)?;
        y = safe_add(y, dy)?;

        result.push(Point { x, y, on_curve });
    }

    Ok(triplet_index)
}

/// Generate a loca table given a slice of loca offsets and an index format
///
/// See <https://learn.microsoft.com/en-us/typography/opentype/spec/loca>
pub(crate) fn generate_loca_table(loca_values: &[u32], index_format: u16) -> Result<Vec<u8>> {
    let offset_size: usize = if index_format != 0 { 4 } else { 2 };

    let mut loca_content: Vec<u8> = Vec::with_capacity(loca_values.len() * offset_size);
    if index_format != 0 {
        for &value in loca_values {
            loca_content.put_u32(value);
        }
    } else {
        for &value in loca_values {
            // The short version stores the offset divided by 2
            bail_malformed_if!(
                value > 2 * u16::MAX as u32,
                WOFF2_FORMAT,
                "glyf: offset {value} does not fit a short loca table"
            );
            loca_content.put_u16((value >> 1) as u16);
        }
    }

    Ok(loca_content)
}
