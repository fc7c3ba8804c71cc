/// The benchalot Cargo package version. This environment variable is
/// guaranteed to be made available by Cargo.
pub const BENCHALOT_VERSION: &'static str = env!("CARGO_PKG_VERSION");

/// The commit revision hash that benchalot was built from. This environment
/// variable is set by a custom build script, and is only available when `git`
/// is available.
pub const BENCHALOT_REVISION: Option<&'static str> =
    option_env!("BENCHALOT_REVISION");

/// Returns a complete version string for `benchalot`.
///
/// If `git` was available while building `benchalot`, then this includes the
/// revision hash.
pub fn version() -> String {
    let mut s = BENCHALOT_VERSION.to_string();
    if let Some(rev) = BENCHALOT_REVISION {
        s.push_str(&format!(" (rev {})", rev));
    }
    s
}

/// Write the given divider character `width` times to the given writer.
pub fn write_divider<W: std::io::Write>(
    mut wtr: W,
    divider: char,
    width: usize,
) -> anyhow::Result<()> {
    let div: String = std::iter::repeat(divider).take(width).collect();
    write!(wtr, "{}", div)?;
    Ok(())
}

/// Colorize the given writer in a "label" style.
pub fn colorize_label<W: termcolor::WriteColor>(
    mut wtr: W,
    mut with: impl FnMut(&mut W) -> std::io::Result<()>,
) -> anyhow::Result<()> {
    let mut spec = termcolor::ColorSpec::new();
    spec.set_bold(true);
    wtr.set_color(&spec)?;
    with(&mut wtr)?;
    wtr.reset()?;
    Ok(())
}

/// Colorize the given writer in a "error" style.
pub fn colorize_error<W: termcolor::WriteColor>(
    mut wtr: W,
    mut with: impl FnMut(&mut W) -> std::io::Result<()>,
) -> anyhow::Result<()> {
    let mut spec = termcolor::ColorSpec::new();
    spec.set_fg(Some(termcolor::Color::Red));
    spec.set_bold(true);
    wtr.set_color(&spec)?;
    with(&mut wtr)?;
    wtr.reset()?;
    Ok(())
}

/// Formats a measurement value for human consumption. Values are printed
/// with four digits after the decimal point, with trailing zeros (and a
/// trailing '.') removed so that integral values like exit counts don't read
/// as '3.0000'.
pub fn format_value(v: f64) -> String {
    let mut s = format!("{:.4}", v);
    if s.contains('.') {
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_formatting() {
        assert_eq!("3", format_value(3.0));
        assert_eq!("3.5", format_value(3.5));
        assert_eq!("0.1235", format_value(0.123456));
        assert_eq!("-2.25", format_value(-2.25));
    }
}
