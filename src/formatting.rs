use std::fmt::Write;

// <METRIC_NAME>:<VALUE>|g
// <METRIC_NAME>:<VALUE>|g|#<TAG_1>,<TAG_2>
//
// Every emission is a gauge: the values are already aggregated statistics, not increments.
const METRIC_TYPE: &str = "g";

/// A gauge reading as handed over by the registry.
///
/// Numeric and boolean readings have a wire representation; [`GaugeValue::Text`] and
/// [`GaugeValue::Absent`] do not and are skipped by the reporter.
#[derive(Clone, Debug, PartialEq)]
pub enum GaugeValue {
    F32(f32),
    F64(f64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    I128(i128),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    U128(u128),
    Bool(bool),
    Text(String),
    Absent,
}

macro_rules! impl_from_gauge_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for GaugeValue {
                fn from(value: $ty) -> Self {
                    GaugeValue::$variant(value)
                }
            }
        )*
    };
}

impl_from_gauge_value!(
    f32 => F32,
    f64 => F64,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    i128 => I128,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    u128 => U128,
    bool => Bool,
    String => Text,
);

impl From<&str> for GaugeValue {
    fn from(value: &str) -> Self {
        GaugeValue::Text(value.to_owned())
    }
}

impl<T: Into<GaugeValue>> From<Option<T>> for GaugeValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(GaugeValue::Absent, Into::into)
    }
}

/// Renders a gauge reading, or `None` when the reading has no wire representation.
pub fn format_value(value: &GaugeValue) -> Option<String> {
    let formatted = match value {
        GaugeValue::F32(v) => format_float(f64::from(*v)),
        GaugeValue::F64(v) => format_float(*v),
        GaugeValue::I8(v) => v.to_string(),
        GaugeValue::I16(v) => v.to_string(),
        GaugeValue::I32(v) => v.to_string(),
        GaugeValue::I64(v) => v.to_string(),
        GaugeValue::I128(v) => v.to_string(),
        GaugeValue::U8(v) => v.to_string(),
        GaugeValue::U16(v) => v.to_string(),
        GaugeValue::U32(v) => v.to_string(),
        GaugeValue::U64(v) => v.to_string(),
        GaugeValue::U128(v) => v.to_string(),
        GaugeValue::Bool(true) => "1".to_string(),
        GaugeValue::Bool(false) => "0".to_string(),
        GaugeValue::Text(_) | GaugeValue::Absent => return None,
    };
    Some(formatted)
}

/// Fixed two decimal places with a `.` separator, independent of any locale.
///
/// Infinities render as `Infinity`/`-Infinity` and not-a-number as `NaN`.
pub fn format_float(value: f64) -> String {
    if value.is_infinite() {
        let sign = if value.is_sign_negative() { "-" } else { "" };
        return format!("{}Infinity", sign);
    }
    format!("{:.2}", value)
}

/// Integral rendering of a recorded sample, truncated toward zero.
pub fn format_whole(value: f64) -> String {
    // saturates at the i64 range; NaN becomes 0
    (value as i64).to_string()
}

/// Joins name components with `.`, skipping absent and empty ones.
///
/// This is the canonical joiner: metric names produced by the registry bridge and the wire
/// names produced by the reporter both go through it, so they always agree.
pub fn metric_name<'a, I>(prefix: Option<&'a str>, components: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut out = String::new();
    for part in prefix.into_iter().chain(components) {
        if part.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('.');
        }
        out.push_str(part);
    }
    out
}

/// Replaces characters that would break the line framing of a metric name.
pub fn sanitize_metric_name(name: &str) -> String {
    name.chars()
        .map(|c| if invalid_metric_name_character(c) { '_' } else { c })
        .collect()
}

/// Replaces characters that would break the tag list. `:` is kept for `key:value` tags.
pub fn sanitize_tag(tag: &str) -> String {
    tag.chars()
        .map(|c| if invalid_tag_character(c) { '_' } else { c })
        .collect()
}

/// Appends one StatsD line (without trailing newline) to `buffer`.
///
/// The name and tags are sanitized on the way out (see [`sanitize_metric_name`] and
/// [`sanitize_tag`]) and empty tags are left out; the remaining tags keep their order.
pub fn write_metric_line(buffer: &mut String, name: &str, value: &str, tags: &[String]) {
    buffer.push_str(&sanitize_metric_name(name));
    buffer.push(':');
    buffer.push_str(value);
    buffer.push('|');
    buffer.push_str(METRIC_TYPE);

    let mut tags = tags.iter().filter(|tag| !tag.is_empty());
    if let Some(first) = tags.next() {
        buffer.push_str("|#");
        buffer.push_str(&sanitize_tag(first));
        for tag in tags {
            // writing into a String cannot fail
            let _ = write!(buffer, ",{}", sanitize_tag(tag));
        }
    }
}

#[inline]
fn invalid_metric_name_character(c: char) -> bool {
    matches!(c, ':' | '|' | '@' | '#' | ',') || c.is_control()
}

#[inline]
fn invalid_tag_character(c: char) -> bool {
    matches!(c, '|' | ',') || c.is_control()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(name: &str, value: &str, tags: &[&str]) -> String {
        let tags: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
        let mut buffer = String::new();
        write_metric_line(&mut buffer, name, value, &tags);
        buffer
    }

    #[test]
    #[allow(clippy::approx_constant)]
    fn test_format_float() {
        assert_eq!(format_value(&GaugeValue::F64(3.14159)), Some("3.14".to_string()));
        assert_eq!(format_value(&GaugeValue::F32(0.5)), Some("0.50".to_string()));
        assert_eq!(format_value(&GaugeValue::F64(-3.44)), Some("-3.44".to_string()));
        assert_eq!(format_float(1234567.0), "1234567.00");
    }

    #[test]
    fn test_format_non_finite() {
        assert_eq!(format_float(f64::INFINITY), "Infinity");
        assert_eq!(format_float(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(format_float(f64::NAN), "NaN");
        assert_eq!(format_value(&GaugeValue::F32(f32::INFINITY)), Some("Infinity".to_string()));
    }

    #[test]
    fn test_format_whole() {
        assert_eq!(format_whole(9.0), "9");
        assert_eq!(format_whole(9.99), "9");
        assert_eq!(format_whole(-2.5), "-2");
        assert_eq!(format_whole(0.0), "0");
    }

    #[test]
    fn test_format_integers() {
        assert_eq!(format_value(&42i32.into()), Some("42".to_string()));
        assert_eq!(format_value(&(-7i8).into()), Some("-7".to_string()));
        assert_eq!(format_value(&1_000_000u64.into()), Some("1000000".to_string()));
        assert_eq!(
            format_value(&GaugeValue::U128(u128::MAX)),
            Some("340282366920938463463374607431768211455".to_string())
        );
    }

    #[test]
    fn test_format_bool() {
        assert_eq!(format_value(&true.into()), Some("1".to_string()));
        assert_eq!(format_value(&false.into()), Some("0".to_string()));
    }

    #[test]
    fn test_format_unrepresentable() {
        assert_eq!(format_value(&"up".into()), None);
        assert_eq!(format_value(&GaugeValue::Absent), None);
        assert_eq!(format_value(&GaugeValue::from(None::<f64>)), None);
        assert_eq!(format_value(&GaugeValue::from(Some(2u16))), Some("2".to_string()));
    }

    #[test]
    fn test_metric_name() {
        assert_eq!(metric_name(Some("foo"), ["bar", "p99"]), "foo.bar.p99");
        assert_eq!(metric_name(None, ["bar", "p99"]), "bar.p99");
        assert_eq!(metric_name(Some(""), ["bar"]), "bar");
        assert_eq!(metric_name(Some("foo"), ["", "bar", ""]), "foo.bar");
        assert_eq!(metric_name(None, []), "");
    }

    #[test]
    fn test_write_metric_line() {
        assert_eq!(line("foo.hits", "5", &[]), "foo.hits:5|g");
        assert_eq!(line("foo.hits", "5", &["env", "prod"]), "foo.hits:5|g|#env,prod");
        assert_eq!(line("up", "1", &["region:eu-west"]), "up:1|g|#region:eu-west");
    }

    #[test]
    fn test_sanitized_line() {
        assert_eq!(line("yee:haw|now", "1", &[]), "yee_haw_now:1|g");
        assert_eq!(line("ok", "1", &["a|b", "c,d", "", "e\nf"]), "ok:1|g|#a_b,c_d,e_f");
    }
}
