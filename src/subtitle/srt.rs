use crate::error::{Result, SubtransError};

/// One parsed SubRip block.
#[derive(Debug, Clone, PartialEq)]
pub struct SrtCue {
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

/// Parse SubRip content into cues, in file order.
pub fn parse_srt(content: &str) -> Result<Vec<SrtCue>> {
    let content = content.trim_start_matches('\u{feff}').replace("\r\n", "\n");

    let mut cues = Vec::new();
    let mut block: Vec<(usize, &str)> = Vec::new();

    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            if !block.is_empty() {
                cues.push(parse_block(&block)?);
                block.clear();
            }
        } else {
            block.push((line_no + 1, line));
        }
    }
    if !block.is_empty() {
        cues.push(parse_block(&block)?);
    }

    Ok(cues)
}

fn parse_block(block: &[(usize, &str)]) -> Result<SrtCue> {
    // The sequence number is optional; some tools omit it
    let timing_pos = block
        .iter()
        .take(2)
        .position(|(_, line)| line.contains("-->"))
        .ok_or_else(|| {
            SubtransError::Parse(format!("line {}: expected a timing line", block[0].0))
        })?;

    let (line_no, timing) = block[timing_pos];
    let (start, end) = timing.split_once("-->").ok_or_else(|| {
        SubtransError::Parse(format!("line {}: malformed timing '{}'", line_no, timing))
    })?;

    let start_ms = parse_srt_time(start)
        .map_err(|e| SubtransError::Parse(format!("line {}: {}", line_no, e)))?;
    // Anything after the end timestamp (positioning hints) is ignored
    let end_token = end.split_whitespace().next().unwrap_or_default();
    let end_ms = parse_srt_time(end_token)
        .map_err(|e| SubtransError::Parse(format!("line {}: {}", line_no, e)))?;

    if end_ms <= start_ms {
        return Err(SubtransError::Parse(format!(
            "line {}: cue ends at or before its start ({})",
            line_no,
            timing.trim()
        )));
    }

    let text = block[timing_pos + 1..]
        .iter()
        .map(|(_, line)| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n");

    Ok(SrtCue { start_ms, end_ms, text })
}

/// Parse `HH:MM:SS,mmm` (a `.` separator is accepted too) into milliseconds.
pub fn parse_srt_time(value: &str) -> Result<u64> {
    let value = value.trim();
    let invalid = || SubtransError::Parse(format!("invalid timestamp '{}'", value));

    let (clock, millis) = value
        .split_once(',')
        .or_else(|| value.split_once('.'))
        .ok_or_else(invalid)?;

    let parts: Vec<&str> = clock.split(':').collect();
    if parts.len() != 3 || millis.is_empty() || millis.len() > 3 {
        return Err(invalid());
    }

    let number = |s: &str| s.parse::<u64>().map_err(|_| invalid());
    let hours = number(parts[0])?;
    let minutes = number(parts[1])?;
    let seconds = number(parts[2])?;
    if minutes >= 60 || seconds >= 60 {
        return Err(invalid());
    }
    // "5" after the separator means 500 ms
    let millis = number(millis)? * 10u64.pow(3 - millis.len() as u32);

    hours
        .checked_mul(3_600_000)
        .and_then(|ms| ms.checked_add(minutes * 60_000 + seconds * 1000 + millis))
        .ok_or_else(invalid)
}

/// Format milliseconds as SRT time (HH:MM:SS,mmm)
pub fn format_srt_time(total_milliseconds: u64) -> String {
    let hours = total_milliseconds / 3_600_000;
    let minutes = (total_milliseconds % 3_600_000) / 60_000;
    let secs = (total_milliseconds % 60_000) / 1_000;
    let millis = total_milliseconds % 1_000;

    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

/// Render cues as SubRip, numbering them from 1.
pub fn write_srt<'a, I>(cues: I) -> String
where
    I: IntoIterator<Item = (u64, u64, &'a str)>,
{
    let mut srt_content = String::new();

    for (index, (start, end, text)) in cues.into_iter().enumerate() {
        srt_content.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            index + 1,
            format_srt_time(start),
            format_srt_time(end),
            text.trim()
        ));
    }

    srt_content
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_srt_time() {
        assert_eq!(format_srt_time(0), "00:00:00,000");
        assert_eq!(format_srt_time(65_123), "00:01:05,123");
        assert_eq!(format_srt_time(3_661_500), "01:01:01,500");
    }

    #[test]
    fn test_parse_srt_time_accepts_both_separators() {
        assert_eq!(parse_srt_time("00:01:05,123").unwrap(), 65_123);
        assert_eq!(parse_srt_time(" 01:01:01.5 ").unwrap(), 3_661_500);
        assert!(parse_srt_time("00:61:00,000").is_err());
        assert!(parse_srt_time("1:02").is_err());
        assert!(parse_srt_time("aa:bb:cc,ddd").is_err());
    }

    #[test]
    fn test_parse_srt_time_rejects_overflowing_hours() {
        let err = parse_srt_time("18446744073709551:00:00,000").unwrap_err();
        assert!(matches!(err, SubtransError::Parse(_)));
        assert_eq!(parse_srt_time("100:00:00,000").unwrap(), 360_000_000);
    }

    #[test]
    fn test_parse_srt_handles_bom_crlf_and_multiline_text() {
        let content = "\u{feff}1\r\n00:00:01,000 --> 00:00:02,500\r\nHello\r\nthere\r\n\r\n\
                       2\r\n00:00:03,000 --> 00:00:04,000 X1:10 X2:20\r\nBye\r\n";

        let cues = parse_srt(content).unwrap();
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0], SrtCue { start_ms: 1000, end_ms: 2500, text: "Hello\nthere".into() });
        assert_eq!(cues[1].end_ms, 4000);
        assert_eq!(cues[1].text, "Bye");
    }

    #[test]
    fn test_parse_srt_tolerates_missing_sequence_numbers() {
        let cues = parse_srt("00:00:01,000 --> 00:00:02,000\nNo index\n").unwrap();
        assert_eq!(cues[0].text, "No index");
    }

    #[test]
    fn test_parse_srt_rejects_malformed_timing() {
        let err = parse_srt("1\n00:00:05,000 --> 00:00:04,000\nBackwards\n").unwrap_err();
        assert!(matches!(err, SubtransError::Parse(_)));

        let err = parse_srt("1\nnot a timing line\ntext\n").unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_write_srt_numbers_blocks() {
        let out = write_srt(vec![(0, 1000, "a"), (1000, 2000, "b\nc")]);
        assert_eq!(
            out,
            "1\n00:00:00,000 --> 00:00:01,000\na\n\n2\n00:00:01,000 --> 00:00:02,000\nb\nc\n\n"
        );
    }
}
