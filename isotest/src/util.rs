//! Diff renderers used by the reporter.

use std::io::Write;

use colored::Colorize;

/// Splits text on `\n` the way [`str::lines`] does, without decoding it.
fn byte_lines(text: &[u8]) -> Vec<&[u8]> {
    if text.is_empty() {
        return vec![];
    }
    text.strip_suffix(b"\n")
        .unwrap_or(text)
        .split(|b| *b == b'\n')
        .collect()
}

/// Writes a unified, line-based diff between two texts. Lines are compared
/// as bytes and only decoded for display.
pub fn write_diff(
    writer: &mut impl Write,
    indent: usize,
    expected: &[u8],
    observed: &[u8],
) -> std::io::Result<()> {
    let indent_str = " ".repeat(indent);
    let expected = byte_lines(expected);
    let observed = byte_lines(observed);

    for d in diff::slice(&expected, &observed) {
        let formatted = match d {
            diff::Result::Left(l) => std::format!("{indent_str}- {}", lossy(l)).red(),
            diff::Result::Both(l, _) => std::format!("{indent_str}  {}", lossy(l)).bright_black(),
            diff::Result::Right(r) => std::format!("{indent_str}+ {}", lossy(r)).green(),
        };

        writeln!(writer, "{formatted}")?;
    }

    Ok(())
}

/// Writes an `expected`/`result` line pair for every line position where the
/// two texts differ, including positions only one side reaches.
pub fn write_positional_diff(
    writer: &mut impl Write,
    indent: usize,
    expected: &[u8],
    observed: &[u8],
) -> std::io::Result<()> {
    let indent_str = " ".repeat(indent);
    let expected = byte_lines(expected);
    let observed = byte_lines(observed);

    for i in 0..expected.len().max(observed.len()) {
        let left = expected.get(i).copied();
        let right = observed.get(i).copied();
        if left == right {
            continue;
        }

        writeln!(
            writer,
            "{indent_str}{} {}",
            "expected:".cyan(),
            lossy(left.unwrap_or_default())
        )?;
        writeln!(
            writer,
            "{indent_str}{}   {}",
            "result:".bright_red(),
            lossy(right.unwrap_or_default())
        )?;
    }

    Ok(())
}

fn lossy(line: &[u8]) -> std::borrow::Cow<'_, str> {
    String::from_utf8_lossy(line)
}

/// Writes a two-line hex dump of both blobs, highlighting differing bytes.
/// Positions past the end of the shorter blob are left blank.
pub fn write_byte_diff(
    writer: &mut impl Write,
    indent: usize,
    expected: &[u8],
    observed: &[u8],
) -> std::io::Result<()> {
    let indent_str = " ".repeat(indent);
    let len = expected.len().max(observed.len());

    let render = |this: &[u8], other: &[u8], highlight: fn(String) -> colored::ColoredString| {
        let mut line = String::new();
        for i in 0..len {
            let cell = match this.get(i) {
                Some(byte) if other.get(i) == Some(byte) => std::format!("{byte:02x}").normal(),
                Some(byte) => highlight(std::format!("{byte:02x}")),
                None => "  ".normal(),
            };
            line.push_str(&cell.to_string());
            line.push(' ');
        }
        line.trim_end().to_owned()
    };

    writeln!(
        writer,
        "{indent_str}{} {}",
        "expected:".cyan(),
        render(expected, observed, |s| s.cyan())
    )?;
    writeln!(
        writer,
        "{indent_str}{}   {}",
        "result:".bright_red(),
        render(observed, expected, |s| s.bright_red())
    )?;

    Ok(())
}

#[cfg(test)]
#[expect(clippy::panic_in_result_fn)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn render(f: impl FnOnce(&mut Vec<u8>) -> std::io::Result<()>) -> anyhow::Result<String> {
        colored::control::set_override(false);
        let mut out = vec![];
        f(&mut out)?;
        Ok(String::from_utf8(out)?)
    }

    #[test]
    fn positional_diff_reports_only_differing_lines() -> anyhow::Result<()> {
        let out = render(|w| write_positional_diff(w, 2, b"a\nb\nc", b"a\nx\nc\nd"))?;
        assert_eq!(
            out,
            "  expected: b\n  result:   x\n  expected: \n  result:   d\n"
        );
        Ok(())
    }

    #[test]
    fn byte_diff_blanks_exhausted_positions() -> anyhow::Result<()> {
        let out = render(|w| write_byte_diff(w, 0, b"\x00\x01\x02", b"\x00\x07"))?;
        assert_eq!(out, "expected: 00 01 02\nresult:   00 07\n");
        Ok(())
    }

    #[test]
    fn unified_diff_marks_both_sides() -> anyhow::Result<()> {
        let out = render(|w| write_diff(w, 0, b"a\nb", b"a\nc"))?;
        assert_eq!(out, "  a\n- b\n+ c\n");
        Ok(())
    }

    #[test]
    fn invalid_utf8_lines_still_differ() -> anyhow::Result<()> {
        let out = render(|w| write_positional_diff(w, 0, b"ok\n\xff", b"ok\n\xfe"))?;
        assert_eq!(out, "expected: \u{fffd}\nresult:   \u{fffd}\n");

        let out = render(|w| write_diff(w, 0, b"\xff", b"\xfe"))?;
        assert_eq!(out, "- \u{fffd}\n+ \u{fffd}\n");
        Ok(())
    }

    #[test]
    fn trailing_newline_does_not_add_a_line() -> anyhow::Result<()> {
        let out = render(|w| write_positional_diff(w, 0, b"a\n", b"a"))?;
        assert_eq!(out, "");
        Ok(())
    }
}
