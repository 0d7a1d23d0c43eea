//! DSL parser for authorization schemas.
//!
//! Parses the schema language into [`Schema`] structures:
//!
//! ```text
//! type user
//!
//! type document
//!   relations
//!     define owner: [user]
//!     define editor: [user] or owner
//!     define viewer: [user, group#member, user:*] or editor
//! ```
//!
//! Operator precedence, tightest first: `but not`, `and`, `or`.
//! Expressions end at the line break; `#` starts a comment.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, multispace1, space0, space1},
    combinator::{all_consuming, map, opt, value},
    error::{convert_error, VerboseError},
    multi::{many0, many1, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

use crate::error::{EngineError, EngineResult};

use super::types::{
    RelationDefinition, RelationExpr, Schema, SubjectTypeRule, TypeDefinition,
};

type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

/// Keywords that cannot be used as identifiers.
const RESERVED_KEYWORDS: &[&str] = &[
    "type",
    "relations",
    "define",
    "or",
    "and",
    "but",
    "not",
    "from",
    "this",
];

fn is_reserved(s: &str) -> bool {
    RESERVED_KEYWORDS.contains(&s)
}

/// Comment from `#` to end of line.
fn comment(input: &str) -> PResult<'_, ()> {
    value((), pair(char('#'), take_while(|c| c != '\n' && c != '\r')))(input)
}

/// Whitespace including comments.
fn ws(input: &str) -> PResult<'_, ()> {
    value((), many0(alt((value((), multispace1), comment))))(input)
}

/// Identifier: alphanumeric or underscore, not a reserved keyword.
fn identifier(input: &str) -> PResult<'_, &str> {
    let (rest, id) = take_while1(|c: char| c.is_alphanumeric() || c == '_')(input)?;
    if is_reserved(id) {
        return Err(nom::Err::Error(nom::error::make_error(
            input,
            nom::error::ErrorKind::Tag,
        )));
    }
    Ok((rest, id))
}

// ============ Subject type rules ============

/// One entry of a bracketed subject list: `user`, `group#member`, `user:*`.
fn subject_rule(input: &str) -> PResult<'_, SubjectTypeRule> {
    #[derive(Clone)]
    enum Suffix<'a> {
        Userset(&'a str),
        Wildcard,
    }

    let (rest, type_name) = identifier(input)?;
    let (rest, suffix) = opt(alt((
        map(preceded(char('#'), identifier), Suffix::Userset),
        value(Suffix::Wildcard, tag(":*")),
    )))(rest)?;

    let rule = match suffix {
        None => SubjectTypeRule::direct(type_name),
        Some(Suffix::Userset(relation)) => SubjectTypeRule::userset(type_name, relation),
        Some(Suffix::Wildcard) => SubjectTypeRule::wildcard(type_name),
    };
    Ok((rest, rule))
}

/// A bracketed subject list: `[user, group#member, user:*]`.
fn subject_rules(input: &str) -> PResult<'_, Vec<SubjectTypeRule>> {
    delimited(
        char('['),
        separated_list1(tuple((space0, char(','), space0)), subject_rule),
        char(']'),
    )(input)
}

// ============ Relation expressions ============

/// `computed from tupleset`.
fn traverse_expr(input: &str) -> PResult<'_, RelationExpr> {
    map(
        tuple((identifier, space1, tag("from"), space1, identifier)),
        |(computed, _, _, _, tupleset)| RelationExpr::Traverse {
            tupleset: tupleset.to_string(),
            computed: computed.to_string(),
        },
    )(input)
}

/// `this`, a traversal, or a reference to another relation.
fn base_expr(input: &str) -> PResult<'_, RelationExpr> {
    alt((
        value(RelationExpr::Direct, tag("this")),
        traverse_expr,
        map(identifier, |name| RelationExpr::Computed {
            relation: name.to_string(),
        }),
    ))(input)
}

/// Exclusion level: `base but not subtract` (tightest operator).
fn exclusion_expr(input: &str) -> PResult<'_, RelationExpr> {
    let (rest, base) = base_expr(input)?;
    let (rest, subtract) = opt(preceded(
        tuple((space1, tag("but"), space1, tag("not"), space1)),
        base_expr,
    ))(rest)?;

    let expr = match subtract {
        Some(subtract) => RelationExpr::Exclusion {
            base: Box::new(base),
            subtract: Box::new(subtract),
        },
        None => base,
    };
    Ok((rest, expr))
}

/// Intersection level: `and` binds tighter than `or`.
fn intersection_expr(input: &str) -> PResult<'_, RelationExpr> {
    let (rest, first) = exclusion_expr(input)?;
    let (rest, others) = many0(preceded(
        tuple((space0, tag("and"), space1)),
        exclusion_expr,
    ))(rest)?;

    if others.is_empty() {
        Ok((rest, first))
    } else {
        let mut children = vec![first];
        children.extend(others);
        Ok((rest, RelationExpr::Intersection { children }))
    }
}

/// Union level (loosest operator).
fn union_expr(input: &str) -> PResult<'_, RelationExpr> {
    let (rest, first) = intersection_expr(input)?;
    let (rest, others) = many0(preceded(
        tuple((space0, tag("or"), space1)),
        intersection_expr,
    ))(rest)?;

    if others.is_empty() {
        Ok((rest, first))
    } else {
        let mut children = vec![first];
        children.extend(others);
        Ok((rest, RelationExpr::Union { children }))
    }
}

/// Operator continuation after a subject list, e.g. `[user] or editor`.
/// The bracketed list stands for the direct assignment itself, so the
/// continuation's operator decides how it combines.
enum Continuation {
    Or(Vec<RelationExpr>),
    And(Vec<RelationExpr>),
    ButNot(RelationExpr),
}

fn rule_continuation(input: &str) -> PResult<'_, Continuation> {
    alt((
        map(
            many1(preceded(
                tuple((space0, tag("or"), space1)),
                intersection_expr,
            )),
            Continuation::Or,
        ),
        map(
            many1(preceded(tuple((space0, tag("and"), space1)), exclusion_expr)),
            Continuation::And,
        ),
        map(
            preceded(
                tuple((space0, tag("but"), space1, tag("not"), space1)),
                base_expr,
            ),
            Continuation::ButNot,
        ),
    ))(input)
}

/// Body of a relation definition: either a subject list with optional
/// operator continuation, or a bare expression.
fn relation_body(input: &str) -> PResult<'_, (Vec<SubjectTypeRule>, RelationExpr)> {
    alt((
        map(
            pair(subject_rules, opt(rule_continuation)),
            |(rules, continuation)| {
                let expr = match continuation {
                    None => RelationExpr::Direct,
                    Some(Continuation::Or(others)) => {
                        let mut children = vec![RelationExpr::Direct];
                        children.extend(others);
                        RelationExpr::Union { children }
                    }
                    Some(Continuation::And(others)) => {
                        let mut children = vec![RelationExpr::Direct];
                        children.extend(others);
                        RelationExpr::Intersection { children }
                    }
                    Some(Continuation::ButNot(subtract)) => RelationExpr::Exclusion {
                        base: Box::new(RelationExpr::Direct),
                        subtract: Box::new(subtract),
                    },
                };
                (rules, expr)
            },
        ),
        map(union_expr, |expr| (Vec::new(), expr)),
    ))(input)
}

/// `define viewer: [user] or editor`.
fn relation_definition(input: &str) -> PResult<'_, RelationDefinition> {
    map(
        tuple((
            space0,
            tag("define"),
            space1,
            identifier,
            char(':'),
            space0,
            relation_body,
        )),
        |(_, _, _, name, _, _, (subject_types, expr))| RelationDefinition {
            name: name.to_string(),
            subject_types,
            expr,
        },
    )(input)
}

/// `type document` with an optional `relations` block.
fn type_definition(input: &str) -> PResult<'_, TypeDefinition> {
    map(
        tuple((
            tag("type"),
            space1,
            identifier,
            ws,
            opt(preceded(
                tuple((tag("relations"), ws)),
                many0(terminated(relation_definition, ws)),
            )),
        )),
        |(_, _, name, _, relations)| TypeDefinition {
            name: name.to_string(),
            relations: relations.unwrap_or_default(),
        },
    )(input)
}

fn schema(input: &str) -> PResult<'_, Schema> {
    map(
        tuple((ws, many0(terminated(type_definition, ws)))),
        |(_, type_definitions)| Schema { type_definitions },
    )(input)
}

/// Parses a schema DSL string into a [`Schema`].
///
/// The result is structurally valid but unvalidated; pass it to
/// [`crate::model::compile`] to resolve references and build the
/// evaluatable model.
pub fn parse(input: &str) -> EngineResult<Schema> {
    match all_consuming(schema)(input) {
        Ok((_, schema)) => Ok(schema),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(EngineError::SchemaParse {
            message: convert_error(input, e),
        }),
        Err(nom::Err::Incomplete(_)) => Err(EngineError::SchemaParse {
            message: "incomplete input".to_string(),
        }),
    }
}
