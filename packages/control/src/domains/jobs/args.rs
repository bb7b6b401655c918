//! Codecs between typed job fields and the string-to-string argument map.

use super::ArgsError;
use crate::kernel::jobs::JobArgs;

/// Decoding cursor over a job's arguments, tagged with the job type for
/// error messages.
pub struct ArgReader<'a> {
    job_type: &'static str,
    args: &'a JobArgs,
}

impl<'a> ArgReader<'a> {
    pub fn new(job_type: &'static str, args: &'a JobArgs) -> Self {
        Self { job_type, args }
    }

    pub fn string(&self, key: &'static str) -> Result<String, ArgsError> {
        self.args
            .get(key)
            .cloned()
            .ok_or(ArgsError::Missing {
                job_type: self.job_type,
                key,
            })
    }

    /// Optional string; a missing key and an empty value both read as `None`.
    pub fn optional(&self, key: &'static str) -> Option<String> {
        self.args.get(key).filter(|v| !v.is_empty()).cloned()
    }

    /// `"y"` or `"n"`.
    pub fn flag(&self, key: &'static str) -> Result<bool, ArgsError> {
        let value = self.string(key)?;
        decode_flag(&value).ok_or(ArgsError::Malformed {
            job_type: self.job_type,
            key,
            value,
        })
    }

    /// Comma-joined list. The empty string is the empty list.
    pub fn list(&self, key: &'static str) -> Result<Vec<String>, ArgsError> {
        Ok(decode_list(&self.string(key)?))
    }

    /// A value that must be one of `allowed`.
    pub fn one_of(&self, key: &'static str, allowed: &[&str]) -> Result<String, ArgsError> {
        let value = self.string(key)?;
        if allowed.contains(&value.as_str()) {
            Ok(value)
        } else {
            Err(ArgsError::Malformed {
                job_type: self.job_type,
                key,
                value,
            })
        }
    }
}

/// Builder for an argument map.
#[derive(Default)]
pub struct ArgWriter {
    args: JobArgs,
}

impl ArgWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn string(mut self, key: &str, value: impl Into<String>) -> Self {
        self.args.insert(key.to_string(), value.into());
        self
    }

    pub fn optional(self, key: &str, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.string(key, value),
            None => self,
        }
    }

    pub fn flag(self, key: &str, value: bool) -> Self {
        self.string(key, encode_flag(value))
    }

    pub fn list(self, key: &str, values: &[String]) -> Self {
        self.string(key, values.join(","))
    }

    pub fn build(self) -> JobArgs {
        self.args
    }
}

pub fn encode_flag(value: bool) -> &'static str {
    if value {
        "y"
    } else {
        "n"
    }
}

pub fn decode_flag(value: &str) -> Option<bool> {
    match value {
        "y" => Some(true),
        "n" => Some(false),
        _ => None,
    }
}

pub fn decode_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_y_or_n_only() {
        assert_eq!(decode_flag("y"), Some(true));
        assert_eq!(decode_flag("n"), Some(false));
        assert_eq!(decode_flag("yes"), None);
        assert_eq!(decode_flag(""), None);
    }

    #[test]
    fn empty_string_is_empty_list() {
        assert!(decode_list("").is_empty());
        assert_eq!(decode_list("a,b"), vec!["a", "b"]);
    }

    #[test]
    fn reader_reports_missing_and_malformed_keys() {
        let args = ArgWriter::new().string("social", "maybe").build();
        let reader = ArgReader::new("signup", &args);

        assert!(matches!(
            reader.string("crsid"),
            Err(ArgsError::Missing { key: "crsid", .. })
        ));
        assert!(matches!(
            reader.flag("social"),
            Err(ArgsError::Malformed { key: "social", .. })
        ));
    }

    #[test]
    fn one_of_rejects_unknown_values() {
        let args = ArgWriter::new().string("action", "promote").build();
        let reader = ArgReader::new("change_society_admin", &args);
        assert!(reader.one_of("action", &["add", "remove"]).is_err());
    }
}
