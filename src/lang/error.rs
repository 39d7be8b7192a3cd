use serde::Serialize;

/// Compiler and assembler error value. Fatal errors stop the pipeline;
/// the first one wins. Warnings travel as [`Diagnostic`] instead.
pub struct Error {
    code: ErrorCode,
    line: Option<usize>,
    column: Option<usize>,
    message: &'static str,
}

#[doc(hidden)]
#[macro_export]
macro_rules! error {
    ($err:ident) => {
        $crate::lang::Error::new($crate::lang::ErrorCode::$err)
    };
    ($err:ident, $line:expr) => {
        $crate::lang::Error::new($crate::lang::ErrorCode::$err).in_line($line)
    };
    ($err:ident; $msg:expr) => {
        $crate::lang::Error::new($crate::lang::ErrorCode::$err).message($msg)
    };
    ($err:ident, $line:expr; $msg:expr) => {
        $crate::lang::Error::new($crate::lang::ErrorCode::$err)
            .in_line($line)
            .message($msg)
    };
}

impl Error {
    pub fn new(code: ErrorCode) -> Error {
        Error {
            code,
            line: None,
            column: None,
            message: "",
        }
    }

    pub fn in_line(self, line: usize) -> Error {
        Error {
            line: Some(line),
            ..self
        }
    }

    pub fn in_column(self, column: usize) -> Error {
        Error {
            column: Some(column),
            ..self
        }
    }

    pub fn message(self, message: &'static str) -> Error {
        Error { message, ..self }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn line(&self) -> Option<usize> {
        self.line
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    SyntaxError,
    UnterminatedString,
    InvalidCharacter,
    UnclosedBlock,
    UndefinedLabel,
    DuplicateSymbol,
    UndefinedSymbol,
    IllegalFunctionCall,
    InvalidInstruction,
    InternalError,
}

impl ErrorCode {
    fn as_str(&self) -> &'static str {
        use ErrorCode::*;
        match self {
            SyntaxError => "SYNTAX ERROR",
            UnterminatedString => "UNTERMINATED STRING",
            InvalidCharacter => "INVALID CHARACTER",
            UnclosedBlock => "UNCLOSED BLOCK",
            UndefinedLabel => "UNDEFINED LABEL",
            DuplicateSymbol => "DUPLICATE SYMBOL",
            UndefinedSymbol => "UNDEFINED SYMBOL",
            IllegalFunctionCall => "ILLEGAL FUNCTION CALL",
            InvalidInstruction => "INVALID INSTRUCTION",
            InternalError => "INTERNAL ERROR",
        }
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Error {{ {} }}", self)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.code.as_str())?;
        if let Some(line) = self.line {
            write!(f, " IN LINE {}", line)?;
            if let Some(column) = self.column {
                write!(f, ":{}", column)?;
            }
        }
        if !self.message.is_empty() {
            write!(f, "; {}", self.message)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// Interchange form of errors and warnings, one per finding.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub line: Option<usize>,
    pub message: String,
}

impl Diagnostic {
    pub fn warning(line: Option<usize>, message: impl Into<String>) -> Diagnostic {
        Diagnostic {
            severity: Severity::Warning,
            line,
            message: message.into(),
        }
    }
}

impl From<&Error> for Diagnostic {
    fn from(error: &Error) -> Diagnostic {
        Diagnostic {
            severity: Severity::Error,
            line: error.line,
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let e = Error::new(ErrorCode::UndefinedLabel)
            .in_line(12)
            .message("MAIN");
        assert_eq!(e.to_string(), "UNDEFINED LABEL IN LINE 12; MAIN");
    }
}
