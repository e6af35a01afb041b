//! 文本格式的迁移系统解析（APT 风格的 `.lts` 文件）。
//!
//! ```text
//! .name "example"
//! .type LTS
//! .states
//! s0[initial]
//! s1
//! .labels
//! a[location="left"]
//! .arcs
//! s0 a s1
//! ```
use nom::branch::alt;
use nom::bytes::complete::{take_while, take_while1};
use nom::character::complete::{char, space0, space1};
use nom::combinator::{all_consuming, opt};
use nom::multi::separated_list0;
use nom::sequence::{delimited, preceded};
use nom::{IResult, Parser};

use crate::ts::{TransitionSystem, TsError};

type Extension<'a> = (&'a str, Option<&'a str>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Header,
    States,
    Labels,
    Arcs,
}

fn identifier(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || matches!(c, '_' | '-' | '\'' | '#')).parse(input)
}

fn quoted(input: &str) -> IResult<&str, &str> {
    delimited(char('"'), take_while(|c: char| c != '"'), char('"')).parse(input)
}

fn value(input: &str) -> IResult<&str, &str> {
    alt((quoted, identifier)).parse(input)
}

fn extension(input: &str) -> IResult<&str, Extension<'_>> {
    (
        preceded(space0, identifier),
        opt(preceded((space0, char('='), space0), value)),
    )
        .parse(input)
}

fn extensions(input: &str) -> IResult<&str, Vec<Extension<'_>>> {
    delimited(
        char('['),
        separated_list0(char(','), extension),
        preceded(space0, char(']')),
    )
    .parse(input)
}

fn declaration(input: &str) -> IResult<&str, (&str, Vec<Extension<'_>>)> {
    let (rest, name) = identifier(input)?;
    let (rest, ext) = opt(preceded(space0, extensions)).parse(rest)?;
    Ok((rest, (name, ext.unwrap_or_default())))
}

fn arc(input: &str) -> IResult<&str, (&str, &str, &str)> {
    (
        identifier,
        preceded(space1, identifier),
        preceded(space1, identifier),
    )
        .parse(input)
}

fn directive(input: &str) -> IResult<&str, (&str, Option<&str>)> {
    (
        preceded(char('.'), identifier),
        opt(preceded(space1, value)),
    )
        .parse(input)
}

fn run<'a, O, P>(line: usize, input: &'a str, parser: P) -> Result<O, TsError>
where
    P: Parser<&'a str, Output = O, Error = nom::error::Error<&'a str>>,
{
    all_consuming(parser)
        .parse(input)
        .map(|(_, output)| output)
        .map_err(|err| TsError::Parse {
            line,
            message: match err {
                nom::Err::Error(e) | nom::Err::Failure(e) => {
                    format!("unexpected input near `{}`", e.input)
                }
                nom::Err::Incomplete(_) => "incomplete input".to_string(),
            },
        })
}

fn strip_comment(line: &str) -> &str {
    let mut in_quotes = false;
    let bytes = line.as_bytes();
    for (idx, ch) in line.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '/' if !in_quotes && bytes.get(idx + 1) == Some(&b'/') => return &line[..idx],
            _ => {}
        }
    }
    line
}

/// Parses the textual transition system format.
pub fn parse_lts(source: &str) -> Result<TransitionSystem, TsError> {
    let mut section = Section::Header;
    let mut name = String::new();
    let mut states: Vec<String> = Vec::new();
    let mut initial: Option<String> = None;
    let mut locations: Vec<(String, String)> = Vec::new();
    let mut arcs: Vec<(String, String, String)> = Vec::new();

    for (idx, raw) in source.lines().enumerate() {
        let line_no = idx + 1;
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with('.') {
            let (keyword, argument) = run(line_no, line, directive)?;
            match keyword {
                "name" => name = argument.unwrap_or_default().to_string(),
                "description" | "options" => {}
                "type" => {
                    if argument != Some("LTS") {
                        return Err(TsError::Parse {
                            line: line_no,
                            message: format!("unsupported type `{}`", argument.unwrap_or("")),
                        });
                    }
                }
                "states" => section = Section::States,
                "labels" => section = Section::Labels,
                "arcs" => section = Section::Arcs,
                other => {
                    return Err(TsError::Parse {
                        line: line_no,
                        message: format!("unknown section `.{other}`"),
                    });
                }
            }
            continue;
        }

        match section {
            Section::Header => {
                return Err(TsError::Parse {
                    line: line_no,
                    message: "content before the first section".to_string(),
                });
            }
            Section::States => {
                let (state, ext) = run(line_no, line, declaration)?;
                if states.iter().any(|s| s == state) {
                    return Err(TsError::DuplicateState(state.to_string()));
                }
                if ext.iter().any(|(key, _)| *key == "initial") {
                    if initial.is_some() {
                        return Err(TsError::Parse {
                            line: line_no,
                            message: "more than one initial state".to_string(),
                        });
                    }
                    initial = Some(state.to_string());
                }
                states.push(state.to_string());
            }
            Section::Labels => {
                let (label, ext) = run(line_no, line, declaration)?;
                if let Some((_, Some(location))) = ext.iter().find(|(key, _)| *key == "location") {
                    locations.push((label.to_string(), location.to_string()));
                }
            }
            Section::Arcs => {
                let (from, label, to) = run(line_no, line, arc)?;
                arcs.push((from.to_string(), label.to_string(), to.to_string()));
            }
        }
    }

    let initial = initial.ok_or(TsError::MissingInitial)?;
    let mut ts = TransitionSystem::new(initial).with_name(name);
    for state in &states {
        ts.add_state(state.as_str());
    }
    for (from, label, to) in &arcs {
        let source = ts.state(from)?;
        let target = ts.state(to)?;
        ts.add_arc(source, label.as_str(), target);
    }
    for (label, location) in locations {
        ts.set_location(label, location);
    }
    Ok(ts)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        // two step word
        .name "word ab"
        .type LTS
        .states
        s0[initial]
        s1
        s2
        .labels
        a[location="left"]
        b
        .arcs
        s0 a s1 // first
        s1 b s2
    "#;

    #[test]
    fn parses_sample() {
        let ts = parse_lts(SAMPLE).unwrap();
        assert_eq!(ts.name(), "word ab");
        assert_eq!(ts.state_count(), 3);
        assert_eq!(ts.arc_count(), 2);
        assert_eq!(ts.state_name(ts.initial()), "s0");
        assert_eq!(ts.location("a"), Some("left"));
        assert_eq!(ts.location("b"), None);
    }

    #[test]
    fn rejects_unknown_arc_endpoint() {
        let source = ".states\ns0[initial]\n.arcs\ns0 a s9\n";
        assert_eq!(
            parse_lts(source).unwrap_err(),
            TsError::UnknownState("s9".into())
        );
    }

    #[test]
    fn requires_initial_state() {
        let source = ".states\ns0\n";
        assert_eq!(parse_lts(source).unwrap_err(), TsError::MissingInitial);
    }

    #[test]
    fn reports_line_of_malformed_arc() {
        let source = ".states\ns0[initial]\n.arcs\ns0 a\n";
        match parse_lts(source) {
            Err(TsError::Parse { line, .. }) => assert_eq!(line, 4),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
