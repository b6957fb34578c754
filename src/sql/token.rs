//! Tokens: the atomic units every generated statement is built from.
//!
//! Keywords and punctuation have one fixed spelling; identifiers,
//! parameters and literals are spelled by the dialect.

use super::dialect::{Dialect, SqlDialect};

/// One element of a generated statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // === Query Keywords ===
    Select,
    From,
    Where,
    And,
    Or,
    Not,
    As,
    On,
    Join,
    Inner,
    Left,
    Outer,
    OrderBy,
    Asc,
    Desc,
    Offset,
    Fetch,
    Next,
    Rows,
    Only,
    Top,
    In,
    Like,
    Escape,
    IsNull,
    IsNotNull,
    Null,
    Exists,

    // === DDL Keywords ===
    Create,
    Alter,
    Drop,
    Table,
    Column,
    Index,
    Constraint,
    Primary,
    Key,
    Foreign,
    References,
    Unique,
    Default,
    Cascade,
    NoAction,
    Add,
    If,
    Procedure,
    Type,
    ReadOnly,
    Begin,
    End,

    // === DML Keywords ===
    Insert,
    Into,
    Values,
    Update,
    Set,
    Delete,
    Output,
    Inserted,
    Deleted,

    // === Punctuation ===
    Comma,
    Dot,
    Star,
    LParen,
    RParen,
    Semicolon,

    // === Operators ===
    Eq,
    Ne,
    Lt,
    Gt,
    Lte,
    Gte,
    Plus,
    Minus,

    // === Whitespace / Formatting ===
    Space,
    Newline,
    Indent(usize),
    /// Batch separator on a line of its own (`GO` for T-SQL).
    BatchSeparator,

    // === Dynamic Content ===
    /// Simple identifier (table, column, alias)
    Ident(String),
    /// Qualified identifier: schema.table or just table
    QualifiedIdent {
        schema: Option<String>,
        name: String,
    },
    /// Named statement parameter, rendered with the dialect's prefix.
    Param(String),
    /// Integer literal
    LitInt(i64),
    /// Float literal
    LitFloat(f64),
    /// String literal
    LitString(String),
    /// Boolean literal
    LitBool(bool),
    /// NULL literal
    LitNull,

    /// Function name, rendered upper-case.
    FunctionName(String),

    // === Escape Hatch ===
    /// Raw SQL passed directly to output without escaping.
    ///
    /// # Security Warning
    ///
    /// **Never pass user input to this variant.** Raw SQL is not sanitized.
    /// Only trusted, static fragments and generated type names belong here.
    /// For user-provided values, use `Token::Param` or the literal variants.
    Raw(String),
}

impl Token {
    /// Fixed spelling of keywords, punctuation and operators.
    pub fn keyword(&self) -> Option<&'static str> {
        Some(match self {
            Token::Select => "SELECT",
            Token::From => "FROM",
            Token::Where => "WHERE",
            Token::And => "AND",
            Token::Or => "OR",
            Token::Not => "NOT",
            Token::As => "AS",
            Token::On => "ON",
            Token::Join => "JOIN",
            Token::Inner => "INNER",
            Token::Left => "LEFT",
            Token::Outer => "OUTER",
            Token::OrderBy => "ORDER BY",
            Token::Asc => "ASC",
            Token::Desc => "DESC",
            Token::Offset => "OFFSET",
            Token::Fetch => "FETCH",
            Token::Next => "NEXT",
            Token::Rows => "ROWS",
            Token::Only => "ONLY",
            Token::Top => "TOP",
            Token::In => "IN",
            Token::Like => "LIKE",
            Token::Escape => "ESCAPE",
            Token::IsNull => "IS NULL",
            Token::IsNotNull => "IS NOT NULL",
            Token::Null => "NULL",
            Token::Exists => "EXISTS",
            Token::Create => "CREATE",
            Token::Alter => "ALTER",
            Token::Drop => "DROP",
            Token::Table => "TABLE",
            Token::Column => "COLUMN",
            Token::Index => "INDEX",
            Token::Constraint => "CONSTRAINT",
            Token::Primary => "PRIMARY",
            Token::Key => "KEY",
            Token::Foreign => "FOREIGN",
            Token::References => "REFERENCES",
            Token::Unique => "UNIQUE",
            Token::Default => "DEFAULT",
            Token::Cascade => "CASCADE",
            Token::NoAction => "NO ACTION",
            Token::Add => "ADD",
            Token::If => "IF",
            Token::Procedure => "PROCEDURE",
            Token::Type => "TYPE",
            Token::ReadOnly => "READONLY",
            Token::Begin => "BEGIN",
            Token::End => "END",
            Token::Insert => "INSERT",
            Token::Into => "INTO",
            Token::Values => "VALUES",
            Token::Update => "UPDATE",
            Token::Set => "SET",
            Token::Delete => "DELETE",
            Token::Output => "OUTPUT",
            Token::Inserted => "INSERTED",
            Token::Deleted => "DELETED",
            Token::Comma => ",",
            Token::Dot => ".",
            Token::Star => "*",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::Semicolon => ";",
            Token::Eq => "=",
            Token::Ne => "<>",
            Token::Lt => "<",
            Token::Gt => ">",
            Token::Lte => "<=",
            Token::Gte => ">=",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Space => " ",
            Token::Newline => "\n",
            Token::LitNull => "NULL",
            _ => return None,
        })
    }

    /// Render this token for `dialect`.
    pub fn serialize(&self, dialect: Dialect) -> String {
        if let Some(text) = self.keyword() {
            return text.to_string();
        }
        match self {
            Token::Indent(n) => "    ".repeat(*n),
            Token::BatchSeparator => format!("\n{}\n", dialect.batch_separator()),
            Token::Ident(name) => dialect.quote_identifier(name),
            Token::QualifiedIdent { schema, name } => match schema {
                Some(s) => format!(
                    "{}.{}",
                    dialect.quote_identifier(s),
                    dialect.quote_identifier(name)
                ),
                None => dialect.quote_identifier(name),
            },
            Token::Param(name) => dialect.format_parameter(name),
            Token::LitInt(n) => n.to_string(),
            // T-SQL has no literal for NaN or infinities.
            Token::LitFloat(f) if !f.is_finite() => "NULL".into(),
            Token::LitFloat(f) => ryu::Buffer::new().format(*f).to_string(),
            Token::LitString(s) => dialect.quote_string(s),
            Token::LitBool(b) => dialect.format_bool(*b).into(),
            Token::FunctionName(name) => name.to_uppercase(),
            Token::Raw(s) => s.clone(),
            _ => String::new(),
        }
    }
}

/// Ordered tokens of one statement or script.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenStream {
    tokens: Vec<Token>,
}

impl TokenStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, token: Token) -> &mut Self {
        self.tokens.push(token);
        self
    }

    pub fn extend(&mut self, tokens: impl IntoIterator<Item = Token>) -> &mut Self {
        self.tokens.extend(tokens);
        self
    }

    pub fn append(&mut self, other: &TokenStream) -> &mut Self {
        self.tokens.extend_from_slice(&other.tokens);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn serialize(&self, dialect: Dialect) -> String {
        let mut out = String::new();
        for token in &self.tokens {
            match token.keyword() {
                Some(text) => out.push_str(text),
                None => out.push_str(&token.serialize(dialect)),
            }
        }
        out
    }

    pub fn space(&mut self) -> &mut Self {
        self.push(Token::Space)
    }

    pub fn newline(&mut self) -> &mut Self {
        self.push(Token::Newline)
    }

    pub fn indent(&mut self, n: usize) -> &mut Self {
        self.push(Token::Indent(n))
    }

    pub fn comma(&mut self) -> &mut Self {
        self.push(Token::Comma)
    }

    pub fn lparen(&mut self) -> &mut Self {
        self.push(Token::LParen)
    }

    pub fn rparen(&mut self) -> &mut Self {
        self.push(Token::RParen)
    }

    pub fn semicolon(&mut self) -> &mut Self {
        self.push(Token::Semicolon)
    }
}
