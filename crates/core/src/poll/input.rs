use crate::errors::PollError;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedInput {
    pub question: String,
    pub options: Vec<String>,
    pub settings: Vec<String>,
}

/// Splits `/<trigger> "Question" "Option 1" ... --flag` into its parts.
///
/// Double quotes group words, a backslash escapes the next character, and unquoted words of the
/// form `--name` become settings (without the dashes). Input without any double quote is taken
/// verbatim as the question.
pub fn parse_input(input: &str, trigger: &str) -> Result<ParsedInput, PollError> {
    let normalized = input.replace(['\u{201c}', '\u{201d}'], "\"");
    let command = format!("/{trigger}");
    let rest = normalized.trim();
    let rest = rest.strip_prefix(command.as_str()).unwrap_or(rest).trim();

    let mut parsed = ParsedInput::default();
    if !rest.contains('"') {
        if rest.is_empty() {
            return Err(PollError::EmptyQuestion);
        }
        parsed.question = rest.to_owned();
        return Ok(parsed);
    }

    let mut fields = Vec::new();
    let mut word = String::new();
    let mut quoted = false;
    let mut escaped = false;
    let mut tainted = false;

    for ch in rest.chars() {
        if escaped {
            word.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' => {
                escaped = true;
                tainted = true;
            }
            '"' => {
                quoted = !quoted;
                tainted = true;
            }
            ch if ch.is_whitespace() && !quoted => {
                flush_word(&mut word, &mut tainted, &mut fields, &mut parsed.settings);
            }
            ch => word.push(ch),
        }
    }
    flush_word(&mut word, &mut tainted, &mut fields, &mut parsed.settings);

    let mut fields = fields.into_iter();
    parsed.question = fields.next().unwrap_or_default();
    parsed.options = fields.collect();

    if parsed.question.trim().is_empty() {
        return Err(PollError::EmptyQuestion);
    }
    Ok(parsed)
}

fn flush_word(
    word: &mut String,
    tainted: &mut bool,
    fields: &mut Vec<String>,
    settings: &mut Vec<String>,
) {
    let taken = std::mem::take(word);
    let was_tainted = std::mem::replace(tainted, false);

    if !was_tainted && taken.is_empty() {
        return;
    }
    if !was_tainted && taken.len() > 2 && taken.starts_with("--") {
        settings.push(taken[2..].to_owned());
    } else {
        fields.push(taken);
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_input, ParsedInput};
    use crate::errors::PollError;

    fn parsed(question: &str, options: &[&str], settings: &[&str]) -> ParsedInput {
        ParsedInput {
            question: question.to_owned(),
            options: options.iter().map(|option| option.to_string()).collect(),
            settings: settings.iter().map(|setting| setting.to_string()).collect(),
        }
    }

    #[test]
    fn quoted_fields_and_settings_are_split() {
        let result = parse_input(r#"/poll "Lunch?" "Pizza" "Sushi" --progress --votes=2"#, "poll");

        assert_eq!(result, Ok(parsed("Lunch?", &["Pizza", "Sushi"], &["progress", "votes=2"])));
    }

    #[test]
    fn escapes_keep_literal_quotes() {
        let result = parse_input(r#"/poll "A\"B" "C D" \"E\""#, "poll");

        assert_eq!(result, Ok(parsed("A\"B", &["C D", "\"E\""], &[])));
    }

    #[test]
    fn doubled_backslash_yields_one_backslash() {
        let result = parse_input(r#"/poll "path" "C:\\temp" "D""#, "poll");

        assert_eq!(result, Ok(parsed("path", &["C:\\temp", "D"], &[])));
    }

    #[test]
    fn unquoted_input_is_the_whole_question() {
        for input in ["/poll Where should we eat --progress", "/poll   What   now  "] {
            let result = parse_input(input, "poll").expect("question should parse");
            let expected = input.trim_start_matches("/poll").trim();

            assert_eq!(result, parsed(expected, &[], &[]));
        }
    }

    #[test]
    fn curly_quotes_are_normalized() {
        let result = parse_input("/poll \u{201c}Tea or coffee?\u{201d} \u{201c}Tea\u{201d} \u{201c}Coffee\u{201d}", "poll");

        assert_eq!(result, Ok(parsed("Tea or coffee?", &["Tea", "Coffee"], &[])));
    }

    #[test]
    fn quoted_dashes_are_positional() {
        let result = parse_input(r#"/poll "Q" "--progress" -- --x"#, "poll");

        assert_eq!(result, Ok(parsed("Q", &["--progress", "--"], &["x"])));
    }

    #[test]
    fn empty_quoted_field_is_kept() {
        let result = parse_input(r#"/poll "Q" "" "B""#, "poll");

        assert_eq!(result, Ok(parsed("Q", &["", "B"], &[])));
    }

    #[test]
    fn unmatched_quote_or_trailing_escape_is_tolerated() {
        assert_eq!(
            parse_input(r#"/poll "Q" "open ended"#, "poll"),
            Ok(parsed("Q", &["open ended"], &[]))
        );
        assert_eq!(parse_input(r#"/poll "Q" tail\"#, "poll"), Ok(parsed("Q", &["tail"], &[])));
    }

    #[test]
    fn custom_trigger_is_stripped() {
        let result = parse_input(r#"/vote "Q" "A" "B""#, "vote");

        assert_eq!(result, Ok(parsed("Q", &["A", "B"], &[])));
    }

    #[test]
    fn missing_question_is_an_error() {
        assert_eq!(parse_input("/poll", "poll"), Err(PollError::EmptyQuestion));
        assert_eq!(parse_input("/poll   ", "poll"), Err(PollError::EmptyQuestion));
        assert_eq!(parse_input(r#"/poll "" "A""#, "poll"), Err(PollError::EmptyQuestion));
        assert_eq!(parse_input(r#"/poll --progress "A""#, "poll"), Ok(parsed("A", &[], &["progress"])));
    }
}
