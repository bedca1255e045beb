//! Line-oriented `name: value` property files.
//!
//! ```text
//! # comment
//! include: common.props
//! HPC.width: 4
//! timeStepChanges: { 2:0 6 4:0 24 }
//! weights: { { 1 2 } { 3 4 } }
//! title:: overwritten without a duplicate warning
//! ```
//!
//! A value token that equals the name of an already-defined property is
//! replaced by that property's value. Command-line overrides are set with
//! `immutable = true` before the file is read, so file values cannot
//! replace them.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::ConfigError;

const CMDLINE: &str = "<command line>";

#[derive(Debug, Clone)]
struct Prop {
    name: String,
    value: String,
    file: String,
    line: usize,
    immutable: bool,
    used: bool,
}

/// A property that was defined but never read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnusedProp {
    pub name: String,
    pub file: String,
    pub line: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Props {
    props: Vec<Prop>,
    top_level: String,
    /// Files whose reading is in progress, outermost first.
    reading: Vec<PathBuf>,
}

impl Props {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a property file, following `include` directives.
    pub fn read_file(&mut self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.read_str(&text, path)
    }

    /// Parse property text as if it had been read from `origin`.
    ///
    /// `origin` names the source in diagnostics and anchors relative
    /// `include` paths.
    pub fn read_str(&mut self, text: &str, origin: impl AsRef<Path>) -> Result<(), ConfigError> {
        let origin = origin.as_ref();
        if self.top_level.is_empty() {
            self.top_level = origin.display().to_string();
        }
        self.reading.push(file_key(origin));
        let result = self.parse(text, origin);
        self.reading.pop();
        result
    }

    fn parse(&mut self, text: &str, origin: &Path) -> Result<(), ConfigError> {
        let file = origin.display().to_string();
        for (idx, raw) in text.lines().enumerate() {
            let line_num = idx + 1;
            let line = strip_comment(raw);
            if line.trim().is_empty() {
                continue;
            }

            let colon = line.find(':').ok_or_else(|| ConfigError::Malformed {
                file: file.clone(),
                line: line_num,
                value: raw.to_string(),
                reason: "bad property (no colon)".into(),
            })?;
            let double_colon = line[colon + 1..].starts_with(':');
            let name = line[..colon].trim().to_string();
            let value_start = if double_colon { colon + 2 } else { colon + 1 };
            let value = line[value_start..].trim().to_string();

            if name.eq_ignore_ascii_case("include") {
                let include = resolve_include(origin, &value);
                if self.reading.contains(&file_key(&include)) {
                    return Err(ConfigError::Malformed {
                        file: file.clone(),
                        line: line_num,
                        value: raw.to_string(),
                        reason: "include cycle".into(),
                    });
                }
                self.read_file(&include)?;
                continue;
            }

            if value.is_empty() {
                return Err(ConfigError::Malformed {
                    file: file.clone(),
                    line: line_num,
                    value: raw.to_string(),
                    reason: "bad property (no value)".into(),
                });
            }

            let value = self.substitute(&value);

            match self.position(&name) {
                Some(i) => {
                    let p = &mut self.props[i];
                    if p.immutable {
                        continue;
                    }
                    if !double_colon {
                        warn!(
                            target: "engram::props",
                            "{}: line {} - Duplicate property: {}",
                            file, line_num, name
                        );
                    }
                    p.value = value;
                    p.file = file.clone();
                    p.line = line_num;
                }
                None => self.props.push(Prop {
                    name,
                    value,
                    file: file.clone(),
                    line: line_num,
                    immutable: false,
                    used: false,
                }),
            }
        }
        Ok(())
    }

    /// Set (or add) a property. An immutable property ignores later sets.
    pub fn set(&mut self, name: &str, value: impl Into<String>, immutable: bool) {
        let value = value.into();
        match self.position(name) {
            Some(i) => {
                let p = &mut self.props[i];
                if !p.immutable {
                    p.value = value;
                    p.file = CMDLINE.into();
                    p.line = 0;
                    p.immutable = immutable;
                }
            }
            None => self.props.push(Prop {
                name: name.to_string(),
                value,
                file: CMDLINE.into(),
                line: 0,
                immutable,
                used: false,
            }),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Typed lookup; a missing property is an error.
    pub fn get<T: FromProp>(&mut self, name: &str) -> Result<T, ConfigError> {
        match self.lookup(name) {
            Some(p) => T::from_prop(&p),
            None => Err(ConfigError::Missing {
                name: name.to_string(),
                file: if self.top_level.is_empty() {
                    CMDLINE.to_string()
                } else {
                    self.top_level.clone()
                },
            }),
        }
    }

    /// Typed lookup with a default for absent properties.
    ///
    /// A present but malformed value is still an error.
    pub fn get_or<T: FromProp>(&mut self, name: &str, default: T) -> Result<T, ConfigError> {
        match self.lookup(name) {
            Some(p) => T::from_prop(&p),
            None => Ok(default),
        }
    }

    /// Properties never read, in definition order.
    pub fn unused(&self) -> Vec<UnusedProp> {
        self.props
            .iter()
            .filter(|p| !p.used)
            .map(|p| UnusedProp {
                name: p.name.clone(),
                file: p.file.clone(),
                line: p.line,
            })
            .collect()
    }

    /// Warn about every unused property; with `fatal`, fail if there are any.
    pub fn report_unused(&self, fatal: bool) -> Result<(), ConfigError> {
        let unused = self.unused();
        for u in &unused {
            warn!(
                target: "engram::props",
                "{}: line {} - Unused property: {}",
                u.file, u.line, u.name
            );
        }
        if fatal && !unused.is_empty() {
            return Err(ConfigError::Unused {
                names: unused.into_iter().map(|u| u.name).collect(),
            });
        }
        Ok(())
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.props
            .iter()
            .position(|p| p.name.eq_ignore_ascii_case(name))
    }

    fn lookup(&mut self, name: &str) -> Option<PropRef> {
        let i = self.position(name)?;
        let p = &mut self.props[i];
        p.used = true;
        Some(PropRef {
            name: p.name.clone(),
            value: p.value.clone(),
            file: p.file.clone(),
            line: p.line,
        })
    }

    fn substitute(&mut self, value: &str) -> String {
        let mut out = Vec::new();
        for token in value.split_whitespace() {
            match self.position(token) {
                Some(i) => {
                    self.props[i].used = true;
                    out.push(self.props[i].value.clone());
                }
                None => out.push(token.to_string()),
            }
        }
        out.join(" ")
    }
}

impl fmt::Display for Props {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for p in &self.props {
            writeln!(f, "{}: {}", p.name, p.value)?;
        }
        Ok(())
    }
}

/// Snapshot of one property handed to [`FromProp`].
#[derive(Debug, Clone)]
pub struct PropRef {
    pub name: String,
    pub value: String,
    pub file: String,
    pub line: usize,
}

impl PropRef {
    fn malformed(&self, reason: impl Into<String>) -> ConfigError {
        ConfigError::Malformed {
            file: self.file.clone(),
            line: self.line,
            value: self.value.clone(),
            reason: format!("{}: {}", self.name, reason.into()),
        }
    }

    fn with_value(&self, value: &str) -> PropRef {
        PropRef {
            value: value.to_string(),
            ..self.clone()
        }
    }
}

/// Conversion from a property's textual value.
pub trait FromProp: Sized {
    fn from_prop(p: &PropRef) -> Result<Self, ConfigError>;
}

impl FromProp for String {
    fn from_prop(p: &PropRef) -> Result<Self, ConfigError> {
        let v = p.value.as_str();
        let unquoted = v
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .or_else(|| v.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
            .unwrap_or(v);
        Ok(unquoted.to_string())
    }
}

macro_rules! from_prop_parse {
    ($($t:ty => $what:expr),* $(,)?) => {
        $(
            impl FromProp for $t {
                fn from_prop(p: &PropRef) -> Result<Self, ConfigError> {
                    p.value.trim().parse::<$t>().map_err(|_| p.malformed($what))
                }
            }
        )*
    };
}

from_prop_parse! {
    i64 => "not an integer",
    u32 => "not an unsigned integer",
    u64 => "not an unsigned integer",
    usize => "not an unsigned integer",
    f64 => "not a number",
}

impl FromProp for bool {
    fn from_prop(p: &PropRef) -> Result<Self, ConfigError> {
        match p.value.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(true),
            "false" | "no" | "off" | "0" => Ok(false),
            _ => Err(p.malformed("not a boolean")),
        }
    }
}

impl<T: FromProp> FromProp for Vec<T> {
    fn from_prop(p: &PropRef) -> Result<Self, ConfigError> {
        let tokens = tokenize(&p.value);
        let inner: &[String] = match tokens.as_slice() {
            [first, rest @ .., last] if first == "{" && last == "}" => rest,
            all => all,
        };
        if inner.iter().any(|t| t == "{" || t == "}") {
            return Err(p.malformed("unbalanced or misplaced brace"));
        }
        inner
            .iter()
            .map(|t| T::from_prop(&p.with_value(t)))
            .collect()
    }
}

/// Present values parse as `Some`; pair with `get_or(name, None)`.
impl<T: FromProp> FromProp for Option<T> {
    fn from_prop(p: &PropRef) -> Result<Self, ConfigError> {
        T::from_prop(p).map(Some)
    }
}

/// Double matrix: `{ { 1 2 } { 3 4 } }`, rows of equal length.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix(pub Vec<Vec<f64>>);

impl FromProp for Matrix {
    fn from_prop(p: &PropRef) -> Result<Self, ConfigError> {
        let tokens = tokenize(&p.value);
        let inner = match tokens.as_slice() {
            [first, rest @ .., last] if first == "{" && last == "}" => rest,
            _ => return Err(p.malformed("matrix not brace-enclosed")),
        };

        let mut rows: Vec<Vec<f64>> = Vec::new();
        let mut row: Option<Vec<f64>> = None;
        for t in inner {
            match (t.as_str(), row.as_mut()) {
                ("{", None) => row = Some(Vec::new()),
                ("{", Some(_)) => return Err(p.malformed("expected element, got '{'")),
                ("}", Some(_)) => rows.extend(row.take()),
                ("}", None) => return Err(p.malformed("unbalanced braces")),
                (_, None) => return Err(p.malformed(format!("expected '{{', got '{t}'"))),
                (elem, Some(r)) => r.push(f64::from_prop(&p.with_value(elem))?),
            }
        }
        if row.is_some() {
            return Err(p.malformed("unbalanced braces"));
        }
        if rows.iter().any(|r| r.len() != rows[0].len()) {
            return Err(p.malformed("rows don't have equal size"));
        }
        Ok(Matrix(rows))
    }
}

fn tokenize(value: &str) -> Vec<String> {
    value
        .replace('{', " { ")
        .replace('}', " } ")
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Drop everything from the first unquoted, unescaped `#`.
fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (c, quote) {
            ('\\', _) => escaped = true,
            ('"' | '\'', None) => quote = Some(c),
            (c, Some(q)) if c == q => quote = None,
            ('#', None) => return &line[..i],
            _ => {}
        }
    }
    line
}

/// Identity of a source file for cycle detection.
fn file_key(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn resolve_include(origin: &Path, value: &str) -> PathBuf {
    let path = Path::new(value);
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match origin.parent() {
        Some(dir) => dir.join(path),
        None => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(text: &str) -> Props {
        let mut p = Props::new();
        p.read_str(text, "test.props").unwrap();
        p
    }

    #[test]
    fn reads_scalars_and_strips_comments() {
        let mut p = props(
            "# header\n\
             width: 4   # trailing comment\n\
             k: 0.25\n\
             orthogonal: true\n\
             title: \"a # not a comment\"\n",
        );
        assert_eq!(p.get::<u32>("width").unwrap(), 4);
        assert_eq!(p.get::<f64>("K").unwrap(), 0.25);
        assert!(p.get::<bool>("orthogonal").unwrap());
        assert_eq!(p.get::<String>("title").unwrap(), "a # not a comment");
    }

    #[test]
    fn missing_without_default_is_an_error() {
        let mut p = props("a: 1\n");
        assert!(matches!(
            p.get::<u32>("b"),
            Err(ConfigError::Missing { .. })
        ));
        assert_eq!(p.get_or::<u32>("b", 9).unwrap(), 9);
    }

    #[test]
    fn malformed_value_reports_file_and_line() {
        let mut p = props("a: 1\nb: nope\n");
        match p.get::<f64>("b") {
            Err(ConfigError::Malformed { file, line, .. }) => {
                assert_eq!(file, "test.props");
                assert_eq!(line, 2);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn vectors_and_matrices() {
        let mut p = props(
            "times: { 1:0 2 3:12 }\n\
             empty: { }\n\
             bare: 1 2 3\n\
             m: { { 1 2 } { 3 4 } }\n\
             ragged: { { 1 2 } { 3 } }\n",
        );
        assert_eq!(
            p.get::<Vec<String>>("times").unwrap(),
            vec!["1:0", "2", "3:12"]
        );
        assert!(p.get::<Vec<String>>("empty").unwrap().is_empty());
        assert_eq!(p.get::<Vec<u32>>("bare").unwrap(), vec![1, 2, 3]);
        assert_eq!(
            p.get::<Matrix>("m").unwrap(),
            Matrix(vec![vec![1.0, 2.0], vec![3.0, 4.0]])
        );
        assert!(p.get::<Matrix>("ragged").is_err());
    }

    #[test]
    fn immutable_overrides_survive_file_values() {
        let mut p = Props::new();
        p.set("k", "0.5", true);
        p.read_str("k: 0.1\nother: 1\n", "test.props").unwrap();
        assert_eq!(p.get::<f64>("k").unwrap(), 0.5);
    }

    #[test]
    fn substitutes_defined_names() {
        let mut p = props("side: 8\nwidth: side\n");
        assert_eq!(p.get::<u32>("width").unwrap(), 8);
        // Substitution counts as a use.
        assert!(p.unused().is_empty());
    }

    #[test]
    fn unused_report_is_deterministic() {
        let text = "a: 1\nb: 2\nc: 3\n";
        let mut p1 = props(text);
        let mut p2 = props(text);
        p1.get::<u32>("b").unwrap();
        p2.get::<u32>("b").unwrap();
        assert_eq!(p1.unused(), p2.unused());
        let names: Vec<_> = p1.unused().into_iter().map(|u| u.name).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert!(p1.report_unused(false).is_ok());
        assert!(matches!(
            p1.report_unused(true),
            Err(ConfigError::Unused { .. })
        ));
    }

    #[test]
    fn double_colon_overwrites() {
        let mut p = props("a: 1\na:: 2\n");
        assert_eq!(p.get::<u32>("a").unwrap(), 2);
    }

    #[test]
    fn includes_are_relative_to_the_including_file() {
        let dir = std::env::temp_dir().join(format!("engram-props-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("base.props"), "shared: 7\n").unwrap();
        fs::write(dir.join("top.props"), "include: base.props\nlocal: 1\n").unwrap();

        let mut p = Props::new();
        p.read_file(dir.join("top.props")).unwrap();
        assert_eq!(p.get::<u32>("shared").unwrap(), 7);
        assert_eq!(p.get::<u32>("local").unwrap(), 1);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn include_cycle_is_reported_with_its_line() {
        let dir = std::env::temp_dir().join(format!("engram-cycle-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("a.props"), "x: 1\ninclude: b.props\n").unwrap();
        fs::write(dir.join("b.props"), "y: 2\n\ninclude: a.props\n").unwrap();

        let mut p = Props::new();
        let err = p.read_file(dir.join("a.props")).unwrap_err();
        match err {
            ConfigError::Malformed { file, line, reason, .. } => {
                assert!(file.ends_with("b.props"), "{file}");
                assert_eq!(line, 3);
                assert_eq!(reason, "include cycle");
            }
            other => panic!("unexpected: {other:?}"),
        }

        // Including the same file twice in sequence is not a cycle.
        fs::write(dir.join("c.props"), "include: b2.props\ninclude:: b2.props\n").unwrap();
        fs::write(dir.join("b2.props"), "z:: 3\n").unwrap();
        let mut p = Props::new();
        p.read_file(dir.join("c.props")).unwrap();
        assert_eq!(p.get::<u32>("z").unwrap(), 3);

        fs::remove_dir_all(&dir).ok();
    }
}
