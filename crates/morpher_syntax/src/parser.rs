//! Recursive descent parser for GraphQL documents.
//!
//! One parser handles both type-system documents (schema modules) and
//! executable documents (operations). Parsing stops at the first syntax
//! error; the error is reported in the returned [`DiagnosticBag`].

use crate::ast::*;
use crate::lexer::{block_string_value, string_value, Lexer};
use crate::token::{Token, TokenKind};
use morpher_core::diagnostics::codes;
use morpher_core::{DiagnosticBag, SourceError, Span};

/// Internal parse result. `None` means a diagnostic was already recorded.
type PResult<T> = Option<T>;

/// Deepest nesting of lists, objects, list types and selection sets.
pub const MAX_NESTING: usize = 64;

/// Parser for GraphQL.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    prev_end: u32,
    depth: usize,
    diagnostics: DiagnosticBag,
}

/// Result of parsing.
pub struct ParseResult {
    pub document: Document,
    pub diagnostics: DiagnosticBag,
}

impl ParseResult {
    /// Converts into the document, or the first syntax error.
    pub fn into_result(self, source: &str) -> Result<Document, SourceError> {
        match SourceError::from_bag(&self.diagnostics, source) {
            Some(err) => Err(err),
            None => Ok(self.document),
        }
    }
}

/// Parses a source string into a document, collecting diagnostics.
pub fn parse(source: &str) -> ParseResult {
    let mut parser = Parser::new(source);
    let document = parser.parse_document();
    ParseResult {
        document,
        diagnostics: parser.diagnostics,
    }
}

/// Parses a source string, failing on the first syntax error.
pub fn parse_document(source: &str) -> Result<Document, SourceError> {
    parse(source).into_result(source)
}

impl<'a> Parser<'a> {
    /// Creates a new parser.
    pub fn new(source: &'a str) -> Self {
        let mut lexer = Lexer::new(source);
        let current = lexer.next_token();
        Self {
            lexer,
            current,
            prev_end: 0,
            depth: 0,
            diagnostics: DiagnosticBag::new(),
        }
    }

    #[inline]
    fn at(&self) -> TokenKind {
        self.current.kind
    }

    #[inline]
    fn at_kind(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        self.at_kind(TokenKind::Name) && self.current_text() == keyword
    }

    fn advance(&mut self) {
        self.prev_end = self.current.span.end;
        self.current = self.lexer.next_token();
    }

    /// Peeks at the token after the current one.
    fn peek(&self) -> Token {
        self.lexer.clone().next_token()
    }

    fn current_text(&self) -> &'a str {
        self.lexer.span_text(self.current.span)
    }

    fn span_from(&self, start: u32) -> Span {
        Span::new(start, self.prev_end.max(start))
    }

    fn describe_current(&self) -> String {
        match self.at() {
            TokenKind::Name => format!("Name \"{}\"", self.current_text()),
            TokenKind::Eof => "<EOF>".to_string(),
            TokenKind::Error => format!("character \"{}\"", self.current_text()),
            kind if kind.is_string() || kind == TokenKind::IntLiteral => {
                format!("{} {}", kind, self.current_text())
            }
            kind => format!("\"{kind}\""),
        }
    }

    /// Reports a token the lexer could not finish, if that is the current one.
    fn error_unterminated(&mut self) -> bool {
        if !self.at_kind(TokenKind::UnterminatedString) {
            return false;
        }
        self.diagnostics.error(
            codes::UNTERMINATED_STRING,
            self.current.span,
            "Unterminated string.",
        );
        true
    }

    fn error_unexpected(&mut self) {
        if self.error_unterminated() {
            return;
        }
        let code = if self.at_kind(TokenKind::Eof) {
            codes::UNEXPECTED_EOF
        } else {
            codes::UNEXPECTED_TOKEN
        };
        let message = format!("Unexpected {}.", self.describe_current());
        self.diagnostics
            .error(code, self.current.span, message);
    }

    fn error_expected(&mut self, expected: &str) {
        if self.error_unterminated() {
            return;
        }
        let code = if self.at_kind(TokenKind::Eof) {
            codes::UNEXPECTED_EOF
        } else {
            codes::UNEXPECTED_TOKEN
        };
        let message = format!("Expected {expected}, found {}.", self.describe_current());
        self.diagnostics
            .error(code, self.current.span, message);
    }

    /// Runs `parse` one nesting level deeper, failing past [`MAX_NESTING`].
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        if self.depth >= MAX_NESTING {
            self.diagnostics.error(
                codes::NESTING_LIMIT,
                self.current.span,
                format!("Document nesting exceeds {MAX_NESTING} levels."),
            );
            return None;
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn expect(&mut self, kind: TokenKind) -> PResult<Span> {
        if self.at_kind(kind) {
            let span = self.current.span;
            self.advance();
            Some(span)
        } else {
            self.error_expected(&format!("\"{kind}\""));
            None
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> PResult<()> {
        if self.at_keyword(keyword) {
            self.advance();
            Some(())
        } else {
            self.error_expected(&format!("\"{keyword}\""));
            None
        }
    }

    fn skip_if(&mut self, kind: TokenKind) -> bool {
        if self.at_kind(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Parses a document.
    pub fn parse_document(&mut self) -> Document {
        let start = self.current.span.start;
        let mut definitions = Vec::new();

        if self.at_kind(TokenKind::Eof) {
            self.error_unexpected();
        }

        while !self.at_kind(TokenKind::Eof) {
            match self.parse_definition() {
                Some(def) => definitions.push(def),
                None => break,
            }
        }

        Document {
            definitions,
            span: Span::new(start, self.current.span.end),
        }
    }

    fn parse_definition(&mut self) -> PResult<Definition> {
        if self.at_kind(TokenKind::LBrace) {
            return self.parse_operation().map(Definition::Operation);
        }

        let has_description = self.at().is_string();
        let keyword_token = if has_description {
            self.peek()
        } else {
            self.current
        };

        if keyword_token.kind != TokenKind::Name {
            if has_description {
                self.advance();
            }
            self.error_unexpected();
            return None;
        }

        match self.lexer.span_text(keyword_token.span) {
            "query" | "mutation" | "subscription" if !has_description => {
                self.parse_operation().map(Definition::Operation)
            }
            "fragment" if !has_description => {
                self.parse_fragment_definition().map(Definition::Fragment)
            }
            "extend" if !has_description => self.parse_extension(),
            "schema" => {
                let description = self.parse_description();
                self.parse_schema_definition(description)
                    .map(Definition::Schema)
            }
            "scalar" | "type" | "interface" | "union" | "enum" | "input" => {
                let description = self.parse_description();
                self.parse_type_definition(description)
                    .map(Definition::Type)
            }
            "directive" => {
                let description = self.parse_description();
                self.parse_directive_definition(description)
                    .map(Definition::Directive)
            }
            _ => {
                if has_description {
                    self.advance();
                }
                self.error_unexpected();
                None
            }
        }
    }

    fn parse_description(&mut self) -> Option<Description> {
        let span = self.current.span;
        let raw = self.current_text();
        let value = match self.at() {
            TokenKind::StringLiteral => string_value(raw).unwrap_or_default(),
            TokenKind::BlockStringLiteral => block_string_value(raw),
            _ => return None,
        };
        self.advance();
        Some(Description { value, span })
    }

    fn parse_name(&mut self) -> PResult<Name> {
        if self.at_kind(TokenKind::Name) {
            let name = Name::new(self.current_text(), self.current.span);
            self.advance();
            Some(name)
        } else {
            self.error_expected("Name");
            None
        }
    }

    // ------------------------------------------------------------------
    // Type system
    // ------------------------------------------------------------------

    fn parse_extension(&mut self) -> PResult<Definition> {
        self.expect_keyword("extend")?;
        if self.at_keyword("schema") {
            return self
                .parse_schema_definition(None)
                .map(Definition::SchemaExtension);
        }
        self.parse_type_definition(None)
            .map(Definition::TypeExtension)
    }

    fn parse_schema_definition(
        &mut self,
        description: Option<Description>,
    ) -> PResult<SchemaDefinition> {
        let start = description
            .as_ref()
            .map_or(self.current.span.start, |d| d.span.start);
        self.expect_keyword("schema")?;
        let directives = self.parse_directives(true)?;

        let mut operations = Vec::new();
        if self.skip_if(TokenKind::LBrace) {
            while !self.skip_if(TokenKind::RBrace) {
                let op_start = self.current.span.start;
                let Some(operation) = OperationType::from_keyword(self.current_text())
                    .filter(|_| self.at_kind(TokenKind::Name))
                else {
                    self.error_expected("query, mutation or subscription");
                    return None;
                };
                self.advance();
                self.expect(TokenKind::Colon)?;
                let type_name = self.parse_name()?;
                operations.push(OperationTypeDefinition {
                    operation,
                    type_name,
                    span: self.span_from(op_start),
                });
            }
        }

        Some(SchemaDefinition {
            description,
            directives,
            operations,
            span: self.span_from(start),
        })
    }

    fn parse_type_definition(
        &mut self,
        description: Option<Description>,
    ) -> PResult<TypeDefinition> {
        let start = description
            .as_ref()
            .map_or(self.current.span.start, |d| d.span.start);
        let keyword = self.current_text();
        if !self.at_kind(TokenKind::Name) {
            self.error_unexpected();
            return None;
        }

        match keyword {
            "scalar" => {
                self.advance();
                let name = self.parse_name()?;
                let directives = self.parse_directives(true)?;
                Some(TypeDefinition::Scalar(ScalarTypeDefinition {
                    description,
                    name,
                    directives,
                    span: self.span_from(start),
                }))
            }
            "type" | "interface" => {
                self.advance();
                let name = self.parse_name()?;
                let implements = self.parse_implements()?;
                let directives = self.parse_directives(true)?;
                let fields = if self.at_kind(TokenKind::LBrace) {
                    self.parse_field_definitions()?
                } else {
                    Vec::new()
                };
                let def = ObjectTypeDefinition {
                    description,
                    name,
                    implements,
                    directives,
                    fields,
                    span: self.span_from(start),
                };
                Some(if keyword == "type" {
                    TypeDefinition::Object(def)
                } else {
                    TypeDefinition::Interface(def)
                })
            }
            "union" => {
                self.advance();
                let name = self.parse_name()?;
                let directives = self.parse_directives(true)?;
                let mut members = Vec::new();
                if self.skip_if(TokenKind::Eq) {
                    self.skip_if(TokenKind::Pipe);
                    members.push(self.parse_name()?);
                    while self.skip_if(TokenKind::Pipe) {
                        members.push(self.parse_name()?);
                    }
                }
                Some(TypeDefinition::Union(UnionTypeDefinition {
                    description,
                    name,
                    directives,
                    members,
                    span: self.span_from(start),
                }))
            }
            "enum" => {
                self.advance();
                let name = self.parse_name()?;
                let directives = self.parse_directives(true)?;
                let mut values = Vec::new();
                if self.skip_if(TokenKind::LBrace) {
                    while !self.skip_if(TokenKind::RBrace) {
                        values.push(self.parse_enum_value_definition()?);
                    }
                }
                Some(TypeDefinition::Enum(EnumTypeDefinition {
                    description,
                    name,
                    directives,
                    values,
                    span: self.span_from(start),
                }))
            }
            "input" => {
                self.advance();
                let name = self.parse_name()?;
                let directives = self.parse_directives(true)?;
                let mut fields = Vec::new();
                if self.skip_if(TokenKind::LBrace) {
                    while !self.skip_if(TokenKind::RBrace) {
                        fields.push(self.parse_input_value_definition()?);
                    }
                }
                Some(TypeDefinition::InputObject(InputObjectTypeDefinition {
                    description,
                    name,
                    directives,
                    fields,
                    span: self.span_from(start),
                }))
            }
            _ => {
                self.error_unexpected();
                None
            }
        }
    }

    fn parse_implements(&mut self) -> PResult<Vec<Name>> {
        let mut names = Vec::new();
        if self.at_keyword("implements") {
            self.advance();
            self.skip_if(TokenKind::Amp);
            names.push(self.parse_name()?);
            while self.skip_if(TokenKind::Amp) {
                names.push(self.parse_name()?);
            }
        }
        Some(names)
    }

    fn parse_field_definitions(&mut self) -> PResult<Vec<FieldDefinition>> {
        self.expect(TokenKind::LBrace)?;
        let mut fields = Vec::new();
        while !self.skip_if(TokenKind::RBrace) {
            fields.push(self.parse_field_definition()?);
        }
        Some(fields)
    }

    fn parse_field_definition(&mut self) -> PResult<FieldDefinition> {
        let start = self.current.span.start;
        let description = self.parse_description();
        let name = self.parse_name()?;
        let arguments = self.parse_argument_definitions()?;
        self.expect(TokenKind::Colon)?;
        let ty = self.parse_type()?;
        let directives = self.parse_directives(true)?;
        Some(FieldDefinition {
            description,
            name,
            arguments,
            ty,
            directives,
            span: self.span_from(start),
        })
    }

    fn parse_argument_definitions(&mut self) -> PResult<Vec<InputValueDefinition>> {
        let mut arguments = Vec::new();
        if self.skip_if(TokenKind::LParen) {
            while !self.skip_if(TokenKind::RParen) {
                arguments.push(self.parse_input_value_definition()?);
            }
        }
        Some(arguments)
    }

    fn parse_input_value_definition(&mut self) -> PResult<InputValueDefinition> {
        let start = self.current.span.start;
        let description = self.parse_description();
        let name = self.parse_name()?;
        self.expect(TokenKind::Colon)?;
        let ty = self.parse_type()?;
        let default_value = if self.skip_if(TokenKind::Eq) {
            Some(self.parse_value(true)?)
        } else {
            None
        };
        let directives = self.parse_directives(true)?;
        Some(InputValueDefinition {
            description,
            name,
            ty,
            default_value,
            directives,
            span: self.span_from(start),
        })
    }

    fn parse_enum_value_definition(&mut self) -> PResult<EnumValueDefinition> {
        let start = self.current.span.start;
        let description = self.parse_description();
        if matches!(self.current_text(), "true" | "false" | "null") {
            self.error_expected("enum value name");
            return None;
        }
        let name = self.parse_name()?;
        let directives = self.parse_directives(true)?;
        Some(EnumValueDefinition {
            description,
            name,
            directives,
            span: self.span_from(start),
        })
    }

    fn parse_directive_definition(
        &mut self,
        description: Option<Description>,
    ) -> PResult<DirectiveDefinition> {
        let start = description
            .as_ref()
            .map_or(self.current.span.start, |d| d.span.start);
        self.expect_keyword("directive")?;
        self.expect(TokenKind::At)?;
        let name = self.parse_name()?;
        let arguments = self.parse_argument_definitions()?;
        let repeatable = if self.at_keyword("repeatable") {
            self.advance();
            true
        } else {
            false
        };
        self.expect_keyword("on")?;
        self.skip_if(TokenKind::Pipe);
        let mut locations = vec![self.parse_name()?];
        while self.skip_if(TokenKind::Pipe) {
            locations.push(self.parse_name()?);
        }
        Some(DirectiveDefinition {
            description,
            name,
            arguments,
            repeatable,
            locations,
            span: self.span_from(start),
        })
    }

    // ------------------------------------------------------------------
    // Shared
    // ------------------------------------------------------------------

    fn parse_type(&mut self) -> PResult<Type> {
        let start = self.current.span.start;
        let ty = if self.skip_if(TokenKind::LBracket) {
            let inner = self.nested(Self::parse_type)?;
            self.expect(TokenKind::RBracket)?;
            Type::List(Box::new(inner), self.span_from(start))
        } else {
            Type::Named(self.parse_name()?)
        };

        if self.skip_if(TokenKind::Bang) {
            Some(Type::NonNull(Box::new(ty), self.span_from(start)))
        } else {
            Some(ty)
        }
    }

    fn parse_directives(&mut self, is_const: bool) -> PResult<Vec<Directive>> {
        let mut directives = Vec::new();
        while self.at_kind(TokenKind::At) {
            let start = self.current.span.start;
            self.advance();
            let name = self.parse_name()?;
            let arguments = self.parse_arguments(is_const)?;
            directives.push(Directive {
                name,
                arguments,
                span: self.span_from(start),
            });
        }
        Some(directives)
    }

    fn parse_arguments(&mut self, is_const: bool) -> PResult<Vec<Argument>> {
        let mut arguments = Vec::new();
        if self.skip_if(TokenKind::LParen) {
            if self.at_kind(TokenKind::RParen) {
                self.error_expected("Name");
                return None;
            }
            while !self.skip_if(TokenKind::RParen) {
                let start = self.current.span.start;
                let name = self.parse_name()?;
                self.expect(TokenKind::Colon)?;
                let value = self.parse_value(is_const)?;
                arguments.push(Argument {
                    name,
                    value,
                    span: self.span_from(start),
                });
            }
        }
        Some(arguments)
    }

    fn parse_value(&mut self, is_const: bool) -> PResult<Value> {
        let span = self.current.span;
        let text = self.current_text();
        let value = match self.at() {
            TokenKind::Dollar if !is_const => {
                self.advance();
                let name = self.parse_name()?;
                return Some(Value::Variable(Name::new(
                    name.value,
                    Span::new(span.start, name.span.end),
                )));
            }
            TokenKind::IntLiteral => match text.parse::<i64>() {
                Ok(n) => Value::Int(n, span),
                Err(_) => {
                    self.diagnostics.error(
                        codes::INVALID_LITERAL,
                        span,
                        format!("Int cannot represent value: {text}"),
                    );
                    return None;
                }
            },
            TokenKind::FloatLiteral => match text.parse::<f64>() {
                Ok(n) => Value::Float(n, span),
                Err(_) => {
                    self.error_unexpected();
                    return None;
                }
            },
            TokenKind::StringLiteral => {
                let Some(s) = string_value(text) else {
                    self.diagnostics.error(
                        codes::INVALID_LITERAL,
                        span,
                        "Invalid character escape sequence.",
                    );
                    return None;
                };
                Value::String(s, span)
            }
            TokenKind::BlockStringLiteral => Value::String(block_string_value(text), span),
            TokenKind::Name => match text {
                "true" => Value::Boolean(true, span),
                "false" => Value::Boolean(false, span),
                "null" => Value::Null(span),
                _ => Value::Enum(Name::new(text, span)),
            },
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                while !self.skip_if(TokenKind::RBracket) {
                    items.push(self.nested(|p| p.parse_value(is_const))?);
                }
                return Some(Value::List(items, self.span_from(span.start)));
            }
            TokenKind::LBrace => {
                self.advance();
                let mut fields = Vec::new();
                while !self.skip_if(TokenKind::RBrace) {
                    let name = self.parse_name()?;
                    self.expect(TokenKind::Colon)?;
                    fields.push((name, self.nested(|p| p.parse_value(is_const))?));
                }
                return Some(Value::Object(fields, self.span_from(span.start)));
            }
            _ => {
                self.error_unexpected();
                return None;
            }
        };
        self.advance();
        Some(value)
    }

    // ------------------------------------------------------------------
    // Executable
    // ------------------------------------------------------------------

    fn parse_operation(&mut self) -> PResult<OperationDefinition> {
        let start = self.current.span.start;

        if self.at_kind(TokenKind::LBrace) {
            let selection_set = self.parse_selection_set()?;
            return Some(OperationDefinition {
                operation: OperationType::Query,
                name: None,
                variables: Vec::new(),
                directives: Vec::new(),
                selection_set,
                span: self.span_from(start),
            });
        }

        let Some(operation) = OperationType::from_keyword(self.current_text()) else {
            self.error_unexpected();
            return None;
        };
        self.advance();

        let name = if self.at_kind(TokenKind::Name) {
            Some(self.parse_name()?)
        } else {
            None
        };
        let variables = self.parse_variable_definitions()?;
        let directives = self.parse_directives(false)?;
        let selection_set = self.parse_selection_set()?;

        Some(OperationDefinition {
            operation,
            name,
            variables,
            directives,
            selection_set,
            span: self.span_from(start),
        })
    }

    fn parse_variable_definitions(&mut self) -> PResult<Vec<VariableDefinition>> {
        let mut variables = Vec::new();
        if self.skip_if(TokenKind::LParen) {
            while !self.skip_if(TokenKind::RParen) {
                let start = self.current.span.start;
                self.expect(TokenKind::Dollar)?;
                let name = self.parse_name()?;
                self.expect(TokenKind::Colon)?;
                let ty = self.parse_type()?;
                let default_value = if self.skip_if(TokenKind::Eq) {
                    Some(self.parse_value(true)?)
                } else {
                    None
                };
                let directives = self.parse_directives(true)?;
                variables.push(VariableDefinition {
                    name,
                    ty,
                    default_value,
                    directives,
                    span: self.span_from(start),
                });
            }
        }
        Some(variables)
    }

    fn parse_fragment_definition(&mut self) -> PResult<FragmentDefinition> {
        let start = self.current.span.start;
        self.expect_keyword("fragment")?;
        if self.at_keyword("on") {
            self.error_unexpected();
            return None;
        }
        let name = self.parse_name()?;
        self.expect_keyword("on")?;
        let type_condition = self.parse_name()?;
        let directives = self.parse_directives(false)?;
        let selection_set = self.parse_selection_set()?;
        Some(FragmentDefinition {
            name,
            type_condition,
            directives,
            selection_set,
            span: self.span_from(start),
        })
    }

    fn parse_selection_set(&mut self) -> PResult<SelectionSet> {
        self.nested(Self::parse_selections)
    }

    fn parse_selections(&mut self) -> PResult<SelectionSet> {
        let start = self.current.span.start;
        self.expect(TokenKind::LBrace)?;
        if self.at_kind(TokenKind::RBrace) {
            self.error_expected("Name");
            return None;
        }
        let mut selections = Vec::new();
        while !self.skip_if(TokenKind::RBrace) {
            selections.push(self.parse_selection()?);
        }
        Some(SelectionSet {
            selections,
            span: self.span_from(start),
        })
    }

    fn parse_selection(&mut self) -> PResult<Selection> {
        if self.at_kind(TokenKind::Spread) {
            return self.parse_fragment_selection();
        }

        let start = self.current.span.start;
        let first = self.parse_name()?;
        let (alias, name) = if self.skip_if(TokenKind::Colon) {
            (Some(first), self.parse_name()?)
        } else {
            (None, first)
        };
        let arguments = self.parse_arguments(false)?;
        let directives = self.parse_directives(false)?;
        let selection_set = if self.at_kind(TokenKind::LBrace) {
            Some(self.parse_selection_set()?)
        } else {
            None
        };

        Some(Selection::Field(Field {
            alias,
            name,
            arguments,
            directives,
            selection_set,
            span: self.span_from(start),
        }))
    }

    fn parse_fragment_selection(&mut self) -> PResult<Selection> {
        let start = self.current.span.start;
        self.expect(TokenKind::Spread)?;

        if self.at_kind(TokenKind::Name) && !self.at_keyword("on") {
            let name = self.parse_name()?;
            let directives = self.parse_directives(false)?;
            return Some(Selection::FragmentSpread(FragmentSpread {
                name,
                directives,
                span: self.span_from(start),
            }));
        }

        let type_condition = if self.at_keyword("on") {
            self.advance();
            Some(self.parse_name()?)
        } else {
            None
        };
        let directives = self.parse_directives(false)?;
        let selection_set = self.parse_selection_set()?;
        Some(Selection::InlineFragment(InlineFragment {
            type_condition,
            directives,
            selection_set,
            span: self.span_from(start),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Document {
        match parse_document(source) {
            Ok(doc) => doc,
            Err(err) => panic!("unexpected parse error: {err}"),
        }
    }

    #[test]
    fn test_parse_shorthand_query() {
        let doc = parse_ok("{ secretContextMessage }");
        let op = doc.operations().next().unwrap();
        assert_eq!(op.operation, OperationType::Query);
        assert!(op.name.is_none());
        let Selection::Field(field) = &op.selection_set.selections[0] else {
            panic!("expected field");
        };
        assert_eq!(field.name.as_str(), "secretContextMessage");
    }

    #[test]
    fn test_parse_named_operation_with_variables() {
        let doc = parse_ok(
            r#"
            query GetUser($id: ID!, $limit: Int = 10) @cached {
                me: user(id: $id) {
                    _id
                    ...UserFields
                    ... on Admin { level }
                    ... @include(if: true) { roles }
                }
            }
            fragment UserFields on User { username emails { address } }
            "#,
        );

        let op = doc.operations().next().unwrap();
        assert_eq!(op.name.as_ref().unwrap().as_str(), "GetUser");
        assert_eq!(op.variables.len(), 2);
        assert!(op.variables[0].ty.is_non_null());
        assert!(matches!(op.variables[1].default_value, Some(Value::Int(10, _))));
        assert_eq!(op.directives[0].name.as_str(), "cached");

        let Selection::Field(field) = &op.selection_set.selections[0] else {
            panic!("expected field");
        };
        assert_eq!(field.response_key(), "me");
        assert!(matches!(field.arguments[0].value, Value::Variable(_)));
        let inner = &field.selection_set.as_ref().unwrap().selections;
        assert!(matches!(inner[1], Selection::FragmentSpread(_)));
        assert!(matches!(inner[2], Selection::InlineFragment(ref f) if f.type_condition.is_some()));
        assert!(matches!(inner[3], Selection::InlineFragment(ref f) if f.type_condition.is_none()));

        assert_eq!(doc.fragments().count(), 1);
    }

    #[test]
    fn test_parse_type_system() {
        let doc = parse_ok(
            r#"
            """
            Arbitrary JSON.
            """
            scalar JSON

            schema { query: Query mutation: Mutation }

            "A user of the app"
            type User implements Node & Entity @key(fields: "_id") {
                _id: ID!
                emails(limit: Int = 5): [UserEmail!]
                profile: JSON
            }

            union SearchResult = | User | Post
            enum Role { ADMIN USER }
            input NewUser { username: String!, roles: [Role] = [USER] }
            directive @auth(role: Role) repeatable on FIELD_DEFINITION | OBJECT
            extend type Query { me: User }
            "#,
        );

        assert_eq!(doc.definitions.len(), 8);

        let Definition::Type(TypeDefinition::Scalar(scalar)) = &doc.definitions[0] else {
            panic!("expected scalar");
        };
        assert_eq!(scalar.description.as_ref().unwrap().value, "Arbitrary JSON.");

        let Definition::Type(TypeDefinition::Object(user)) = &doc.definitions[2] else {
            panic!("expected object");
        };
        assert_eq!(user.description.as_ref().unwrap().value, "A user of the app");
        assert_eq!(user.implements.len(), 2);
        assert_eq!(user.fields[1].ty.to_string(), "[UserEmail!]");
        assert_eq!(user.fields[1].ty.name(), "UserEmail");

        let Definition::Type(TypeDefinition::Union(union)) = &doc.definitions[3] else {
            panic!("expected union");
        };
        assert_eq!(union.members.len(), 2);

        let Definition::Directive(directive) = &doc.definitions[6] else {
            panic!("expected directive");
        };
        assert!(directive.repeatable);
        assert_eq!(directive.locations.len(), 2);

        assert!(matches!(
            &doc.definitions[7],
            Definition::TypeExtension(TypeDefinition::Object(ext)) if ext.name.as_str() == "Query"
        ));
    }

    #[test]
    fn test_fields_may_use_keyword_names() {
        let doc = parse_ok("type Query { type: String query: String on: Int }");
        let Definition::Type(TypeDefinition::Object(query)) = &doc.definitions[0] else {
            panic!("expected object");
        };
        assert_eq!(query.fields.len(), 3);
    }

    #[test]
    fn test_empty_document_is_an_error() {
        let err = parse_document("   ").unwrap_err();
        assert_eq!(err.to_string(), "Syntax Error: Unexpected <EOF>.");
    }

    #[test]
    fn test_unexpected_token_reports_location() {
        let err = parse_document("query {\n  hello(\n}").unwrap_err();
        assert_eq!(err.location().line, 3);
        assert!(err.to_string().contains("Expected Name"));
    }

    #[test]
    fn test_empty_selection_set_is_an_error() {
        assert!(parse_document("{ }").is_err());
    }

    #[test]
    fn test_unterminated_string_is_reported_as_such() {
        let err = parse_document(r#"{ f(a: "x\") }"#).unwrap_err();
        assert_eq!(err.to_string(), "Syntax Error: Unterminated string.");

        let err = parse_document("\"\"\"never closed\ntype Query { a: Int }").unwrap_err();
        assert_eq!(err.to_string(), "Syntax Error: Unterminated string.");
    }

    #[test]
    fn test_surrogate_pair_escape() {
        let doc = parse_ok(r#"{ f(a: "\uD83D\uDE00") }"#);
        let op = doc.operations().next().unwrap();
        let Selection::Field(field) = &op.selection_set.selections[0] else {
            panic!("expected field");
        };
        assert!(matches!(&field.arguments[0].value, Value::String(s, _) if s == "\u{1F600}"));
    }

    #[test]
    fn test_deep_nesting_is_a_syntax_error() {
        let values = format!("{{ f(a: {}) }}", "[".repeat(100_000));
        let err = parse_document(&values).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("Syntax Error: Document nesting exceeds {MAX_NESTING} levels.")
        );

        let selections = format!("{}a{}", "{ a ".repeat(100_000), "}".repeat(100_000));
        assert!(parse_document(&selections).is_err());

        let types = format!("type Query {{ f: {}String }}", "[".repeat(100_000));
        assert!(parse_document(&types).is_err());
    }

    #[test]
    fn test_nesting_up_to_the_limit_parses() {
        let depth = MAX_NESTING - 1;
        let source = format!(
            "{{ f(a: {}1{}) }}",
            "[".repeat(depth),
            "]".repeat(depth)
        );
        parse_ok(&source);

        let selections = format!("{}b{}", "{ a ".repeat(MAX_NESTING), "}".repeat(MAX_NESTING));
        parse_ok(&selections);
    }
}
