//! Flag parsing for the `server` binary. Grounded on
//! `original_source/IocpServer/Main.cpp`'s `argc == 2 && strcmp(argv[1],
//! "-t")` check, generalized to accept `-t` and `-v` in either order or
//! combination: `server [-t] [-v]`.

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Options {
    pub tls: bool,
    pub verbose: bool,
}

#[derive(Debug)]
pub struct ParseError(pub String);

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ParseError {}

/// Parses the flags following the program name. Unknown flags are
/// rejected; `server` itself takes no positional arguments.
pub fn parse(args: impl IntoIterator<Item = String>) -> Result<Options, ParseError> {
    let mut opts = Options::default();
    for arg in args {
        match arg.as_str() {
            "-t" => opts.tls = true,
            "-v" => opts.verbose = true,
            other => return Err(ParseError(format!("unrecognized flag: {other}"))),
        }
    }
    Ok(opts)
}
