/// Split a SQL script into individual statements.
///
/// Semicolons inside single-quoted literals, `--` line comments and
/// dollar-quoted bodies (`$$ ... $$`, `$tag$ ... $tag$`) do not end a statement.
/// Statements consisting only of whitespace and comments are dropped.
pub fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut dollar_tag: Option<String> = None;
    let mut in_literal = false;
    let mut in_line_comment = false;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);

        if in_line_comment {
            if c == '\n' {
                in_line_comment = false;
            }
            continue;
        }

        if in_literal {
            if c == '\'' {
                in_literal = false;
            }
            continue;
        }

        match c {
            '$' => {
                let mut tag = String::from("$");
                while let Some(&next) = chars.peek() {
                    if next == '$' {
                        chars.next();
                        tag.push('$');
                        current.push('$');
                        break;
                    } else if next.is_alphanumeric() || next == '_' {
                        chars.next();
                        tag.push(next);
                        current.push(next);
                    } else {
                        break;
                    }
                }

                if tag.len() >= 2 && tag.ends_with('$') {
                    match &dollar_tag {
                        Some(open) if *open == tag => dollar_tag = None,
                        Some(_) => {}
                        None => dollar_tag = Some(tag),
                    }
                }
            }
            _ if dollar_tag.is_some() => {}
            '\'' => in_literal = true,
            '-' if chars.peek() == Some(&'-') => in_line_comment = true,
            ';' => {
                push_statement(&mut statements, &current);
                current.clear();
            }
            _ => {}
        }
    }

    push_statement(&mut statements, &current);
    statements
}

fn push_statement(statements: &mut Vec<String>, raw: &str) {
    let stmt = raw.trim().trim_end_matches(';').trim();
    let only_comments = stmt.lines().all(|l| {
        let l = l.trim();
        l.is_empty() || l.starts_with("--")
    });
    if !only_comments {
        statements.push(stmt.to_string());
    }
}
