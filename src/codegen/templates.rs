//! Template environment: override-then-bundled lookup and helper functions

use include_dir::{include_dir, Dir};
use minijinja::{AutoEscape, Environment, Error, ErrorKind, UndefinedBehavior, Value};
use rand::distr::Alphanumeric;
use rand::Rng;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

static BUNDLED_TEMPLATES: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/templates");

/// Build a strict environment that searches `override_dir` before the
/// templates compiled into the binary
pub fn environment(override_dir: Option<&Path>) -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_auto_escape_callback(|_| AutoEscape::None);
    env.set_keep_trailing_newline(true);

    let override_dir = override_dir.map(Path::to_path_buf);
    env.set_loader(move |name| load_template(override_dir.as_deref(), name));

    env.add_function("raise", raise);
    env.add_function("randomsuffix", random_suffix);
    env.add_filter("normalizepath", normalize_path_filter);
    env.add_filter("totf", to_tf);
    env
}

fn load_template(override_dir: Option<&Path>, name: &str) -> Result<Option<String>, Error> {
    if name.split('/').any(|segment| segment == "..") {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            format!("template name '{name}' escapes the template directory"),
        ));
    }

    if let Some(dir) = override_dir {
        let path: PathBuf = dir.join(name);
        match fs::read_to_string(&path) {
            Ok(source) => return Ok(Some(source)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::new(
                    ErrorKind::InvalidOperation,
                    format!("cannot read template '{}'", path.display()),
                )
                .with_source(e))
            }
        }
    }

    Ok(BUNDLED_TEMPLATES
        .get_file(name)
        .and_then(|file| file.contents_utf8())
        .map(str::to_string))
}

fn raise(message: String) -> Result<Value, Error> {
    Err(Error::new(ErrorKind::InvalidOperation, message))
}

fn random_suffix(length: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect()
}

fn normalize_path_filter(path: Option<String>) -> String {
    normalize_path(path.as_deref().unwrap_or_default())
}

/// Lexically normalize a slash-separated path
///
/// Collapses repeated separators and `.` segments and resolves `..` where a
/// parent exists. A leading slash is kept; a trailing one is dropped.
pub fn normalize_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(&last) if last != ".." => {
                    segments.pop();
                }
                _ if absolute => {}
                _ => segments.push(".."),
            },
            other => segments.push(other),
        }
    }
    let joined = segments.join("/");
    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}

/// Encode a value as an HCL literal
fn to_tf(value: Value) -> Result<String, Error> {
    serde_json::to_string(&value).map_err(|e| {
        Error::new(ErrorKind::InvalidOperation, "value cannot be encoded as a literal").with_source(e)
    })
}
