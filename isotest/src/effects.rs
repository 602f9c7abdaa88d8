//! Effect records: the declared effects of a test and how templates become records.

use std::io::Read;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::signal::Signal;

use crate::error::Error;
use crate::trace_categories;

/// Maximum number of bytes captured from (or declared for) any single stream or file.
pub const CAPTURE_CEILING: usize = 4096;

/// Maximum number of file effects a single record may declare.
pub const FILE_EFFECT_CAPACITY: usize = 16;

/// A zero-argument test body.
pub type TestFn = fn();

bitflags::bitflags! {
    /// Independent per-test options.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct EffectFlags: u8 {
        /// Preserve leading and trailing whitespace in captured text.
        const NO_STRIP = 1 << 0;
        /// Run the test body in the calling process instead of a forked child.
        const NO_FORK = 1 << 1;
        /// Do not print diffs when the test fails.
        const NO_DIFF = 1 << 2;
    }
}

/// Which termination detail a test's expected code refers to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CodeKind {
    /// The value of `errno` after the test body returns.
    ErrNo,
    /// The exit status of the isolated execution context.
    #[default]
    ExitStatus,
    /// The signal that terminated the isolated execution context.
    Signal,
}

impl CodeKind {
    /// Renders a code value of this kind with its symbolic name.
    pub fn describe(self, value: i32) -> String {
        match self {
            Self::ErrNo if value == 0 => String::from("no error (0)"),
            Self::ErrNo => std::format!("{:?} ({value})", Errno::from_raw(value)),
            Self::ExitStatus => std::format!("exit status {value}"),
            Self::Signal if value == 0 => String::from("no signal (0)"),
            Self::Signal => match Signal::try_from(value) {
                Ok(signal) => std::format!("{} ({value})", signal.as_str()),
                Err(_) => std::format!("signal {value}"),
            },
        }
    }
}

/// The code a test is expected to produce; only `value` of the given `kind` is checked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ExpectedCode {
    /// Which termination detail is checked.
    pub kind: CodeKind,
    /// The expected value.
    pub value: i32,
}

impl ExpectedCode {
    /// Expects the isolated execution context to exit with the given status.
    pub const fn exit_status(value: i32) -> Self {
        Self {
            kind: CodeKind::ExitStatus,
            value,
        }
    }

    /// Expects the isolated execution context to be terminated by the given signal.
    pub const fn signal(signal: Signal) -> Self {
        Self {
            kind: CodeKind::Signal,
            value: signal as i32,
        }
    }

    /// Expects `errno` to hold the given value after the test body returns.
    pub const fn errno(errno: Errno) -> Self {
        Self {
            kind: CodeKind::ErrNo,
            value: errno as i32,
        }
    }

    /// Renders the expected value with its symbolic name.
    pub fn describe(&self) -> String {
        self.kind.describe(self.value)
    }
}

/// One of the three standard streams.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StdStream {
    /// Standard input.
    Stdin,
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl StdStream {
    /// All streams, in descriptor order.
    pub const ALL: [Self; 3] = [Self::Stdin, Self::Stdout, Self::Stderr];

    /// The streams whose content a test produces.
    pub const OUTPUTS: [Self; 2] = [Self::Stdout, Self::Stderr];

    /// Index of the stream in a record's `stdio` array.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The descriptor number of the stream.
    pub const fn fd(self) -> i32 {
        self as i32
    }

    /// Name of the stream, as used in diagnostics.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Stdin => "stdin",
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// How content is compared and rendered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ContentMode {
    /// Text, compared up to the first NUL byte and diffed line by line.
    #[default]
    Text,
    /// A fixed-length byte blob, compared in full (NUL bytes included) and hex-diffed.
    Blob,
}

/// Prepared content of a stream or file, owned by exactly one record.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Content {
    bytes: Vec<u8>,
    mode: ContentMode,
}

impl Content {
    /// Creates text content.
    pub fn text(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            mode: ContentMode::Text,
        }
    }

    /// Creates blob content.
    pub fn blob(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            mode: ContentMode::Blob,
        }
    }

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// How the content is compared.
    pub const fn mode(&self) -> ContentMode {
        self.mode
    }

    /// Whether there is no content at all.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The bytes that participate in comparison.
    pub fn comparable(&self) -> &[u8] {
        comparable_bytes(&self.bytes, self.mode)
    }
}

/// Returns the bytes of `bytes` that participate in comparison under `mode`.
pub fn comparable_bytes(bytes: &[u8], mode: ContentMode) -> &[u8] {
    match mode {
        ContentMode::Text => bytes
            .iter()
            .position(|b| *b == 0)
            .map_or(bytes, |nul| &bytes[..nul]),
        ContentMode::Blob => bytes,
    }
}

/// Removes leading and trailing ASCII whitespace.
pub fn strip_whitespace(bytes: &[u8]) -> &[u8] {
    bytes.trim_ascii()
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Origin {
    Inline(Vec<u8>),
    File(PathBuf),
}

/// Where declared content comes from, before preparation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentSource {
    origin: Origin,
    len: Option<usize>,
}

impl ContentSource {
    /// Content given inline.
    pub fn inline(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            origin: Origin::Inline(bytes.into()),
            len: None,
        }
    }

    /// Content loaded from the given file when the test is registered.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            origin: Origin::File(path.into()),
            len: None,
        }
    }

    /// Inline content compared as a blob of exactly its own length.
    pub fn blob(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        let len = bytes.len();
        Self::inline(bytes).with_len(len)
    }

    /// Gives the content an explicit length. A non-zero length makes it a blob.
    #[must_use]
    pub const fn with_len(mut self, len: usize) -> Self {
        self.len = Some(len);
        self
    }

    /// Loads and bounds the content.
    pub fn load(&self, test: &str) -> Result<Content, Error> {
        let mut bytes = match &self.origin {
            Origin::Inline(bytes) => bytes.clone(),
            Origin::File(path) => read_bounded_file(path).map_err(|source| Error::ContentSource {
                test: test.to_owned(),
                path: path.clone(),
                source,
            })?,
        };

        let mode = match self.len {
            Some(len) if len > 0 => {
                bytes.truncate(len);
                ContentMode::Blob
            }
            _ => ContentMode::Text,
        };

        if bytes.len() > CAPTURE_CEILING {
            tracing::debug!(target: trace_categories::REGISTRY, "truncating declared content of '{test}' to {CAPTURE_CEILING} bytes");
            bytes.truncate(CAPTURE_CEILING);
        }

        Ok(Content { bytes, mode })
    }
}

impl From<&str> for ContentSource {
    fn from(value: &str) -> Self {
        Self::inline(value)
    }
}

impl From<String> for ContentSource {
    fn from(value: String) -> Self {
        Self::inline(value)
    }
}

impl From<&[u8]> for ContentSource {
    fn from(value: &[u8]) -> Self {
        Self::inline(value)
    }
}

impl<const N: usize> From<&[u8; N]> for ContentSource {
    fn from(value: &[u8; N]) -> Self {
        Self::inline(value.as_slice())
    }
}

/// Reads a file up to the capture ceiling.
pub(crate) fn read_bounded_file(path: &Path) -> std::io::Result<Vec<u8>> {
    let file = std::fs::File::open(path)?;
    let mut bytes = vec![];
    file.take(CAPTURE_CEILING as u64).read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// A declared file side effect, before preparation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileSpec {
    /// Path of the file the test is expected to produce. An empty path ends the list.
    pub path: PathBuf,
    /// Expected content of the file.
    pub content: ContentSource,
}

/// A prepared file side effect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileEffect {
    /// Path of the file.
    pub path: PathBuf,
    /// Expected content of the file.
    pub content: Content,
}

/// User-supplied description of a test, from which records are prepared.
#[derive(Clone, Debug)]
pub struct EffectSpec {
    /// Name of the test, used in all diagnostics.
    pub name: String,
    /// The test body.
    pub wrapper: TestFn,
    /// Per-test options.
    pub flags: EffectFlags,
    /// The expected termination code.
    pub expected_code: ExpectedCode,
    /// Declared content for stdin (input) and stdout/stderr (expected output).
    pub stdio: [Option<ContentSource>; 3],
    /// Declared file side effects.
    pub files: Vec<FileSpec>,
}

impl EffectSpec {
    /// Creates a description expecting a clean exit and no output.
    pub fn new(name: impl Into<String>, wrapper: TestFn) -> Self {
        Self {
            name: name.into(),
            wrapper,
            flags: EffectFlags::empty(),
            expected_code: ExpectedCode::default(),
            stdio: [None, None, None],
            files: vec![],
        }
    }

    /// Adds the given flags.
    #[must_use]
    pub fn with_flags(mut self, flags: EffectFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Sets the expected code.
    #[must_use]
    pub const fn expect_code(mut self, code: ExpectedCode) -> Self {
        self.expected_code = code;
        self
    }

    /// Expects the given exit status.
    #[must_use]
    pub const fn exit_status(self, status: i32) -> Self {
        self.expect_code(ExpectedCode::exit_status(status))
    }

    /// Expects termination by the given signal.
    #[must_use]
    pub const fn signal(self, signal: Signal) -> Self {
        self.expect_code(ExpectedCode::signal(signal))
    }

    /// Expects `errno` to hold the given value after the body returns.
    #[must_use]
    pub const fn errno(self, errno: Errno) -> Self {
        self.expect_code(ExpectedCode::errno(errno))
    }

    /// Sets the content fed to the test's stdin.
    #[must_use]
    pub fn stdin(self, content: impl Into<ContentSource>) -> Self {
        self.with_stream(StdStream::Stdin, content)
    }

    /// Sets the expected stdout content.
    #[must_use]
    pub fn stdout(self, content: impl Into<ContentSource>) -> Self {
        self.with_stream(StdStream::Stdout, content)
    }

    /// Sets the expected stderr content.
    #[must_use]
    pub fn stderr(self, content: impl Into<ContentSource>) -> Self {
        self.with_stream(StdStream::Stderr, content)
    }

    /// Declares a file the test is expected to leave behind with the given content.
    #[must_use]
    pub fn file(mut self, path: impl Into<PathBuf>, content: impl Into<ContentSource>) -> Self {
        self.files.push(FileSpec {
            path: path.into(),
            content: content.into(),
        });
        self
    }

    fn with_stream(mut self, stream: StdStream, content: impl Into<ContentSource>) -> Self {
        self.stdio[stream.index()] = Some(content.into());
        self
    }
}

/// A prepared, independently owned description of one test's expected effects.
#[derive(Clone, Debug)]
pub struct EffectRecord {
    /// Name of the test.
    pub name: String,
    /// The test body.
    pub wrapper: TestFn,
    /// Per-test options.
    pub flags: EffectFlags,
    /// The expected termination code.
    pub expected_code: ExpectedCode,
    /// Input for stdin and expected output for stdout/stderr, indexed by [`StdStream`].
    pub stdio: [Content; 3],
    /// Expected file side effects.
    pub files: Vec<FileEffect>,
}

impl EffectRecord {
    /// Prepares a record from a description: loads file-backed content,
    /// bounds everything to the capture ceiling and strips expected output
    /// unless `NO_STRIP` is set.
    pub fn prepare(spec: &EffectSpec) -> Result<Self, Error> {
        let mut stdio: [Content; 3] = Default::default();

        for stream in StdStream::ALL {
            let Some(source) = &spec.stdio[stream.index()] else {
                continue;
            };

            let content = source.load(&spec.name)?;
            stdio[stream.index()] = if stream == StdStream::Stdin {
                content
            } else {
                Content {
                    bytes: strip_captured(spec.flags, content.mode, content.bytes),
                    mode: content.mode,
                }
            };
        }

        let mut files = vec![];
        for (index, file) in spec.files.iter().enumerate() {
            if file.path.as_os_str().is_empty() {
                if index + 1 < spec.files.len() {
                    tracing::warn!(target: trace_categories::REGISTRY, "test '{}': ignoring file effects after empty path", spec.name);
                }
                break;
            }

            if files.len() == FILE_EFFECT_CAPACITY {
                tracing::warn!(target: trace_categories::REGISTRY, "test '{}': ignoring file effects beyond the first {FILE_EFFECT_CAPACITY}", spec.name);
                break;
            }

            files.push(FileEffect {
                path: file.path.clone(),
                content: file.content.load(&spec.name)?,
            });
        }

        Ok(Self {
            name: spec.name.clone(),
            wrapper: spec.wrapper,
            flags: spec.flags,
            expected_code: spec.expected_code,
            stdio,
            files,
        })
    }

    /// Declared content of the given stream.
    pub const fn stdio(&self, stream: StdStream) -> &Content {
        &self.stdio[stream.index()]
    }

    /// Whether the given flag is set.
    pub const fn has_flag(&self, flag: EffectFlags) -> bool {
        self.flags.contains(flag)
    }
}

/// Applies the stripping policy to captured (or declared) output.
pub(crate) fn strip_captured(flags: EffectFlags, mode: ContentMode, bytes: Vec<u8>) -> Vec<u8> {
    if flags.contains(EffectFlags::NO_STRIP) || mode == ContentMode::Blob {
        bytes
    } else {
        strip_whitespace(&bytes).to_vec()
    }
}

#[cfg(test)]
#[expect(clippy::panic_in_result_fn)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn nothing() {}

    #[test]
    fn output_is_stripped_by_default() -> anyhow::Result<()> {
        let spec = EffectSpec::new("strip", nothing)
            .stdin("  keep me\n")
            .stdout("  hello  \n");
        let record = EffectRecord::prepare(&spec)?;

        assert_eq!(record.stdio(StdStream::Stdout).as_bytes(), b"hello");
        assert_eq!(record.stdio(StdStream::Stdin).as_bytes(), b"  keep me\n");
        assert!(record.stdio(StdStream::Stderr).is_empty());
        Ok(())
    }

    #[test]
    fn no_strip_preserves_whitespace() -> anyhow::Result<()> {
        let spec = EffectSpec::new("nostrip", nothing)
            .with_flags(EffectFlags::NO_STRIP)
            .stdout("  hello  \n");
        let record = EffectRecord::prepare(&spec)?;

        assert_eq!(record.stdio(StdStream::Stdout).as_bytes(), b"  hello  \n");
        Ok(())
    }

    #[test]
    fn explicit_length_makes_a_blob() -> anyhow::Result<()> {
        let source = ContentSource::inline(b"\0ab cd \0".as_slice()).with_len(4);
        let content = source.load("blob")?;

        assert_eq!(content.mode(), ContentMode::Blob);
        assert_eq!(content.as_bytes(), b"\0ab ");
        assert_eq!(content.comparable(), b"\0ab ");

        let zero = ContentSource::inline("ab\0cd").with_len(0).load("zero")?;
        assert_eq!(zero.mode(), ContentMode::Text);
        assert_eq!(zero.comparable(), b"ab");
        Ok(())
    }

    #[test]
    fn blob_output_is_never_stripped() -> anyhow::Result<()> {
        let spec = EffectSpec::new("blob", nothing).stdout(ContentSource::blob(b" x \n".as_slice()));
        let record = EffectRecord::prepare(&spec)?;

        assert_eq!(record.stdio(StdStream::Stdout).as_bytes(), b" x \n");
        Ok(())
    }

    #[test]
    fn file_backed_content_is_loaded_at_preparation() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let source_path = dir.path().join("expected.txt");
        std::fs::write(&source_path, "from file\n")?;

        let spec = EffectSpec::new("file-backed", nothing)
            .stdout(ContentSource::file(&source_path))
            .file("out.txt", ContentSource::file(&source_path));
        let record = EffectRecord::prepare(&spec)?;

        // The source may change afterwards without affecting the prepared record.
        std::fs::write(&source_path, "changed")?;

        assert_eq!(record.stdio(StdStream::Stdout).as_bytes(), b"from file");
        assert_eq!(record.files[0].content.as_bytes(), b"from file\n");
        Ok(())
    }

    #[test]
    fn missing_content_source_is_an_error() {
        let spec = EffectSpec::new("missing", nothing)
            .stdin(ContentSource::file("/nonexistent/isotest/input"));

        let result = EffectRecord::prepare(&spec);
        assert!(matches!(
            result,
            Err(Error::ContentSource { ref test, .. }) if test == "missing"
        ));
    }

    #[test]
    fn declared_content_is_bounded_by_the_ceiling() -> anyhow::Result<()> {
        let big = "x".repeat(CAPTURE_CEILING * 2);
        let record = EffectRecord::prepare(&EffectSpec::new("big", nothing).stdin(big))?;

        assert_eq!(record.stdio(StdStream::Stdin).as_bytes().len(), CAPTURE_CEILING);
        Ok(())
    }

    #[test]
    fn file_list_ends_at_empty_path_or_capacity() -> anyhow::Result<()> {
        let spec = EffectSpec::new("sentinel", nothing)
            .file("a", "1")
            .file("", "")
            .file("b", "2");
        assert_eq!(EffectRecord::prepare(&spec)?.files.len(), 1);

        let mut spec = EffectSpec::new("capacity", nothing);
        for i in 0..FILE_EFFECT_CAPACITY + 3 {
            spec = spec.file(std::format!("f{i}"), "x");
        }
        assert_eq!(EffectRecord::prepare(&spec)?.files.len(), FILE_EFFECT_CAPACITY);
        Ok(())
    }

    #[test]
    fn code_descriptions_use_symbolic_names() {
        assert_eq!(
            ExpectedCode::signal(Signal::SIGABRT).describe(),
            std::format!("SIGABRT ({})", Signal::SIGABRT as i32)
        );
        assert_eq!(
            ExpectedCode::errno(Errno::ENOENT).describe(),
            std::format!("ENOENT ({})", Errno::ENOENT as i32)
        );
        assert_eq!(ExpectedCode::exit_status(3).describe(), "exit status 3");
        assert_eq!(CodeKind::Signal.describe(0), "no signal (0)");
    }
}
