use crate::error::{Result, SubtransError};

/// Decode PGS run-length data into rows of palette indices.
///
/// Encoding, per run:
/// - `CC`: one pixel of colour CC (CC != 0)
/// - `00 00`: end of line
/// - `00 0L`: L pixels of colour 0 (L < 64)
/// - `00 4L LL`: L pixels of colour 0 (14-bit L)
/// - `00 8L CC`: L pixels of colour CC (L < 64)
/// - `00 CL LL CC`: L pixels of colour CC (14-bit L)
pub fn decode_rle(data: &[u8]) -> Result<Vec<Vec<u8>>> {
    let truncated = |at: usize| SubtransError::Decode(format!("run-length data truncated at byte {}", at));

    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut i = 0;

    while i < data.len() {
        let first = data[i];
        if first != 0 {
            row.push(first);
            i += 1;
            continue;
        }

        let flag = *data.get(i + 1).ok_or_else(|| truncated(i))?;
        if flag == 0 {
            rows.push(std::mem::take(&mut row));
            i += 2;
            continue;
        }

        match flag >> 6 {
            0b00 => {
                row.extend(std::iter::repeat_n(0, usize::from(flag & 0x3f)));
                i += 2;
            }
            0b01 => {
                let low = *data.get(i + 2).ok_or_else(|| truncated(i))?;
                let run = (usize::from(flag & 0x3f) << 8) | usize::from(low);
                row.extend(std::iter::repeat_n(0, run));
                i += 3;
            }
            0b10 => {
                let colour = *data.get(i + 2).ok_or_else(|| truncated(i))?;
                row.extend(std::iter::repeat_n(colour, usize::from(flag & 0x3f)));
                i += 3;
            }
            _ => {
                let low = *data.get(i + 2).ok_or_else(|| truncated(i))?;
                let colour = *data.get(i + 3).ok_or_else(|| truncated(i))?;
                let run = (usize::from(flag & 0x3f) << 8) | usize::from(low);
                row.extend(std::iter::repeat_n(colour, run));
                i += 4;
            }
        }
    }

    // The last line is not always terminated
    if !row.is_empty() {
        rows.push(row);
    }

    Ok(rows)
}
