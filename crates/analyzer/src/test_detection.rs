use globset::{Glob, GlobSet, GlobSetBuilder};
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Configuration files are ignored past this size.
const MAX_CONFIG_BYTES: u64 = 1024 * 1024;
/// At most this many patterns are honored from one config.
const MAX_PATTERNS: usize = 100;
/// Individual patterns longer than this are dropped.
const MAX_PATTERN_LEN: usize = 256;

const DEFAULT_DIR_PATTERNS: &[&str] = &["tests"];
const DEFAULT_FILE_PATTERNS: &[&str] = &["test_*.py", "*_test.py", "conftest.py"];

#[derive(Debug)]
struct CompiledPatterns {
    /// Directory names/paths from `testpaths`, without trailing slashes
    dirs: Vec<String>,
    /// File-name globs from `python_files` plus `conftest.py`
    files: GlobSet,
}

/// Classifies files as test modules using pytest-style configuration.
///
/// Looks for `pytest.ini`, `pyproject.toml` (`[tool.pytest.ini_options]`),
/// `setup.cfg` (`[tool:pytest]`) and `tox.ini` (`[pytest]`) under the
/// project root, falling back to the conventional defaults when none
/// configure pytest. Parsed patterns are cached per root.
pub struct TestFileClassifier {
    default_root: Option<PathBuf>,
    defaults: Arc<CompiledPatterns>,
    cache: RwLock<FxHashMap<PathBuf, Arc<CompiledPatterns>>>,
}

impl TestFileClassifier {
    pub fn new(default_root: Option<PathBuf>) -> Self {
        Self {
            default_root,
            defaults: Arc::new(compile_patterns(
                DEFAULT_DIR_PATTERNS.iter().map(|s| s.to_string()).collect(),
                DEFAULT_FILE_PATTERNS.iter().map(|s| s.to_string()).collect(),
            )),
            cache: RwLock::new(FxHashMap::default()),
        }
    }

    /// True when `path` is a test module under the given (or configured)
    /// project root.
    pub fn is_test_module(&self, path: &Path, project_root: Option<&Path>) -> bool {
        let root = project_root.or(self.default_root.as_deref());
        let patterns = match root {
            Some(root) => self.patterns_for_root(root),
            None => Arc::clone(&self.defaults),
        };

        let relative = match root {
            Some(root) => path.strip_prefix(root).unwrap_or(path),
            None => path,
        };
        let normalized = relative.to_string_lossy().replace('\\', "/");

        for dir in &patterns.dirs {
            if normalized.starts_with(&format!("{dir}/"))
                || normalized.contains(&format!("/{dir}/"))
            {
                return true;
            }
        }

        relative
            .file_name()
            .map(|name| patterns.files.is_match(Path::new(name)))
            .unwrap_or(false)
    }

    fn patterns_for_root(&self, root: &Path) -> Arc<CompiledPatterns> {
        if let Ok(cache) = self.cache.read()
            && let Some(patterns) = cache.get(root)
        {
            return Arc::clone(patterns);
        }

        let patterns = Arc::new(discover_patterns(root).unwrap_or_else(|| {
            compile_patterns(
                DEFAULT_DIR_PATTERNS.iter().map(|s| s.to_string()).collect(),
                DEFAULT_FILE_PATTERNS.iter().map(|s| s.to_string()).collect(),
            )
        }));
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(root.to_path_buf(), Arc::clone(&patterns));
        }
        patterns
    }
}

/// Read pytest configuration for a project root, first matching file wins.
fn discover_patterns(root: &Path) -> Option<CompiledPatterns> {
    let candidates: [(&str, fn(&str) -> Option<PytestSettings>); 4] = [
        ("pytest.ini", |content| ini_settings(content, "pytest")),
        ("pyproject.toml", toml_settings),
        ("setup.cfg", |content| ini_settings(content, "tool:pytest")),
        ("tox.ini", |content| ini_settings(content, "pytest")),
    ];

    for (filename, parse) in candidates {
        let path = root.join(filename);
        let Ok(metadata) = std::fs::metadata(&path) else {
            continue;
        };
        if metadata.len() > MAX_CONFIG_BYTES {
            log::warn!(
                "ignoring oversized pytest config {} ({} bytes)",
                path.display(),
                metadata.len()
            );
            continue;
        }
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        if let Some(settings) = parse(&content) {
            let dirs = if settings.testpaths.is_empty() {
                DEFAULT_DIR_PATTERNS.iter().map(|s| s.to_string()).collect()
            } else {
                settings.testpaths
            };
            let files = if settings.python_files.is_empty() {
                DEFAULT_FILE_PATTERNS.iter().map(|s| s.to_string()).collect()
            } else {
                let mut files = settings.python_files;
                files.push("conftest.py".to_string());
                files
            };
            return Some(compile_patterns(dirs, files));
        }
    }
    None
}

#[derive(Debug, Default)]
struct PytestSettings {
    testpaths: Vec<String>,
    python_files: Vec<String>,
}

/// A pattern is accepted only when it is relative, traversal-free, and
/// reasonably sized.
fn sanitize(patterns: Vec<String>) -> Vec<String> {
    patterns
        .into_iter()
        .filter(|pattern| {
            let ok = !pattern.is_empty()
                && pattern.len() <= MAX_PATTERN_LEN
                && !pattern.contains("..")
                && !pattern.starts_with('/')
                && !pattern.starts_with('\\')
                && !pattern.contains(':');
            if !ok {
                log::warn!("rejecting unsafe pytest pattern {pattern:?}");
            }
            ok
        })
        .take(MAX_PATTERNS)
        .collect()
}

fn compile_patterns(dirs: Vec<String>, files: Vec<String>) -> CompiledPatterns {
    let dirs = sanitize(dirs)
        .into_iter()
        .map(|dir| dir.trim_end_matches('/').to_string())
        .collect();

    let mut builder = GlobSetBuilder::new();
    for pattern in sanitize(files) {
        match Glob::new(&pattern) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(error) => log::warn!("invalid pytest file pattern {pattern:?}: {error}"),
        }
    }
    let files = builder.build().unwrap_or_else(|error| {
        log::warn!("failed to build pytest glob set: {error}");
        GlobSet::empty()
    });

    CompiledPatterns { dirs, files }
}

/// Minimal INI reader: finds `[section]` and collects `key = value` pairs,
/// honoring indented continuation lines for multi-value keys.
fn ini_settings(content: &str, section: &str) -> Option<PytestSettings> {
    let header = format!("[{section}]");
    let mut in_section = false;
    let mut section_found = false;
    let mut current_key: Option<String> = None;
    let mut values: FxHashMap<String, Vec<String>> = FxHashMap::default();

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('[') && trimmed.ends_with(']') {
            in_section = trimmed == header;
            section_found |= in_section;
            current_key = None;
            continue;
        }
        if !in_section || trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';')
        {
            continue;
        }

        if line.starts_with([' ', '\t']) {
            // Continuation of the previous key
            if let Some(key) = &current_key {
                values
                    .entry(key.clone())
                    .or_default()
                    .extend(trimmed.split_whitespace().map(str::to_string));
            }
            continue;
        }

        if let Some((key, value)) = trimmed.split_once('=') {
            let key = key.trim().to_string();
            values
                .entry(key.clone())
                .or_default()
                .extend(value.split_whitespace().map(str::to_string));
            current_key = Some(key);
        }
    }

    section_found.then(|| PytestSettings {
        testpaths: values.remove("testpaths").unwrap_or_default(),
        python_files: values.remove("python_files").unwrap_or_default(),
    })
}

/// `[tool.pytest.ini_options]` in pyproject.toml; values may be a single
/// whitespace-separated string or an array of strings.
fn toml_settings(content: &str) -> Option<PytestSettings> {
    let value: toml::Value = toml::from_str(content).ok()?;
    let options = value.get("tool")?.get("pytest")?.get("ini_options")?;

    let read_list = |key: &str| -> Vec<String> {
        match options.get(key) {
            Some(toml::Value::String(s)) => {
                s.split_whitespace().map(str::to_string).collect()
            }
            Some(toml::Value::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    };

    Some(PytestSettings {
        testpaths: read_list("testpaths"),
        python_files: read_list("python_files"),
    })
}
