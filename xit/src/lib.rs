//! Format engine for `.xit` task lists: checkbox lines grouped under optional
//! titles, carrying status, priority, due date and tags.
//! Modules keep the core pure: every operation maps an immutable line snapshot to a
//! new value, and file I/O stays behind `storage` and the binary.

pub mod core {
    use chrono::NaiveDate;
    use indexmap::IndexSet;
    use serde::{Deserialize, Serialize};
    use std::fmt;

    /* ------------------------------- Status ------------------------------- */

    /// Task status, encoded by the character inside the checkbox.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum Status {
        Open,
        Ongoing,
        Completed,
        Obsolete,
        /// Any checkbox character outside the known set; kept so callers can surface it.
        Unknown,
    }

    impl Status {
        pub fn from_char(c: char) -> Self {
            match c {
                ' ' => Status::Open,
                '@' => Status::Ongoing,
                'x' => Status::Completed,
                '~' => Status::Obsolete,
                _ => Status::Unknown,
            }
        }

        pub fn as_char(self) -> Option<char> {
            match self {
                Status::Open => Some(' '),
                Status::Ongoing => Some('@'),
                Status::Completed => Some('x'),
                Status::Obsolete => Some('~'),
                Status::Unknown => None,
            }
        }

        /// Open → Ongoing → Completed → Obsolete → Open.
        pub fn shifted(self) -> Self {
            match self {
                Status::Open => Status::Ongoing,
                Status::Ongoing => Status::Completed,
                Status::Completed => Status::Obsolete,
                Status::Obsolete => Status::Open,
                Status::Unknown => Status::Unknown,
            }
        }

        /// Completed → Open; every other known status → Completed.
        pub fn toggled(self) -> Self {
            match self {
                Status::Open | Status::Ongoing | Status::Obsolete => Status::Completed,
                Status::Completed => Status::Open,
                Status::Unknown => Status::Unknown,
            }
        }

        pub fn is_closed(self) -> bool {
            matches!(self, Status::Completed | Status::Obsolete)
        }

        pub fn is_active(self) -> bool {
            matches!(self, Status::Open | Status::Ongoing)
        }
    }

    impl fmt::Display for Status {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let label = match self {
                Status::Open => "open",
                Status::Ongoing => "ongoing",
                Status::Completed => "completed",
                Status::Obsolete => "obsolete",
                Status::Unknown => "unknown",
            };
            f.pad(label)
        }
    }

    /* ------------------------------ Line kinds ------------------------------ */

    /// Classification of a single raw line.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum LineKind {
        Blank,
        TaskHead,
        Continuation,
        Title,
        Malformed(Malformed),
    }

    /// Why a line did not fit the shape its context expected.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum Malformed {
        NoClosingBracket,
        InvalidStatus,
        MissingSpace,
        UnexpectedIndent,
        MultipleTitles,
    }

    impl Malformed {
        /// Bracket lines that still open a task for recovery.
        pub fn is_checkbox_issue(self) -> bool {
            matches!(
                self,
                Malformed::NoClosingBracket | Malformed::InvalidStatus | Malformed::MissingSpace
            )
        }
    }

    impl LineKind {
        pub fn is_malformed(self) -> bool {
            matches!(self, LineKind::Malformed(_))
        }

        /// Lines after which an indented line continues the current task.
        pub fn keeps_task_open(self) -> bool {
            match self {
                LineKind::TaskHead | LineKind::Continuation => true,
                LineKind::Malformed(reason) => reason.is_checkbox_issue(),
                LineKind::Blank | LineKind::Title => false,
            }
        }

        /// Titles, including a repeated title kept for recovery.
        pub fn is_title_like(self) -> bool {
            matches!(
                self,
                LineKind::Title | LineKind::Malformed(Malformed::MultipleTitles)
            )
        }
    }

    /* ------------------------------- Ranges ------------------------------- */

    /// Inclusive range of 0-based line numbers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct LineRange {
        pub start: usize,
        pub end: usize,
    }

    impl LineRange {
        pub fn line(row: usize) -> Self {
            Self { start: row, end: row }
        }

        pub fn contains(&self, row: usize) -> bool {
            self.start <= row && row <= self.end
        }

        pub fn line_count(&self) -> usize {
            self.end - self.start + 1
        }

        pub(crate) fn cover(range: Option<LineRange>, row: usize) -> LineRange {
            match range {
                Some(r) => LineRange {
                    start: r.start.min(row),
                    end: r.end.max(row),
                },
                None => LineRange::line(row),
            }
        }
    }

    /* ------------------------------ Value objects ------------------------------ */

    /// A `#name` or `#name=value` occurrence; quoted values are stored without quotes.
    #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Tag {
        pub name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub value: Option<String>,
    }

    impl Tag {
        pub fn new(name: impl Into<String>, value: Option<String>) -> Self {
            Self {
                name: name.into(),
                value,
            }
        }
    }

    /// Precision of a due-date token.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum Granularity {
        Day,
        Week,
        Month,
        Quarter,
        Year,
    }

    /// Raw numbers of a date token. Values are shape-checked only; calendar validity
    /// is decided by `dates::check_date`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum DateUnit {
        Day { year: i32, month: u32, day: u32 },
        Week { year: i32, week: u32 },
        Month { year: i32, month: u32 },
        Quarter { year: i32, quarter: u32 },
        Year { year: i32 },
    }

    /// A due-date token such as `2022-05-03`, `2022/W05` or `2022-Q2`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(into = "String", try_from = "String")]
    pub struct DateToken {
        pub unit: DateUnit,
        /// `-` or `/`, kept so edits write the token back the way it was typed.
        pub separator: char,
    }

    impl DateToken {
        pub fn new(unit: DateUnit, separator: char) -> Self {
            Self { unit, separator }
        }

        pub fn granularity(&self) -> Granularity {
            match self.unit {
                DateUnit::Day { .. } => Granularity::Day,
                DateUnit::Week { .. } => Granularity::Week,
                DateUnit::Month { .. } => Granularity::Month,
                DateUnit::Quarter { .. } => Granularity::Quarter,
                DateUnit::Year { .. } => Granularity::Year,
            }
        }

        pub fn year(&self) -> i32 {
            match self.unit {
                DateUnit::Day { year, .. }
                | DateUnit::Week { year, .. }
                | DateUnit::Month { year, .. }
                | DateUnit::Quarter { year, .. }
                | DateUnit::Year { year } => year,
            }
        }

        /// The token written with `-` separators.
        pub fn normalized(&self) -> String {
            DateToken {
                separator: '-',
                ..*self
            }
            .to_string()
        }
    }

    impl fmt::Display for DateToken {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let s = self.separator;
            match self.unit {
                DateUnit::Day { year, month, day } => {
                    write!(f, "{year:04}{s}{month:02}{s}{day:02}")
                }
                DateUnit::Week { year, week } => write!(f, "{year:04}{s}W{week:02}"),
                DateUnit::Month { year, month } => write!(f, "{year:04}{s}{month:02}"),
                DateUnit::Quarter { year, quarter } => write!(f, "{year:04}{s}Q{quarter}"),
                DateUnit::Year { year } => write!(f, "{year:04}"),
            }
        }
    }

    impl From<DateToken> for String {
        fn from(token: DateToken) -> Self {
            token.to_string()
        }
    }

    impl TryFrom<String> for DateToken {
        type Error = XitError;

        fn try_from(value: String) -> Result<Self, Self::Error> {
            crate::grammar::parse_date_token(&value).ok_or(XitError::InvalidDate(value))
        }
    }

    /* ------------------------------- Entities ------------------------------- */

    /// One checkbox line plus its indented continuation lines, stored verbatim.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Task {
        pub lines: Vec<String>,
        pub range: LineRange,
        /// Set when the head line has a broken checkbox; the task is still kept.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub head_issue: Option<Malformed>,
    }

    impl Task {
        pub fn new(row: usize, head: impl Into<String>, head_issue: Option<Malformed>) -> Self {
            Self {
                lines: vec![head.into()],
                range: LineRange::line(row),
                head_issue,
            }
        }

        pub fn push_line(&mut self, text: impl Into<String>) {
            self.lines.push(text.into());
            self.range.end += 1;
        }

        pub fn head(&self) -> &str {
            self.lines.first().map(String::as_str).unwrap_or("")
        }

        pub fn text(&self) -> String {
            self.lines.join("\n")
        }

        pub fn status(&self) -> Status {
            crate::extract::status(&self.lines)
        }

        pub fn priority(&self) -> usize {
            crate::extract::priority(&self.lines)
        }

        pub fn due_date_token(&self) -> Option<DateToken> {
            crate::extract::due_date_token(&self.lines)
        }

        /// Resolved due date; absent when there is no token or it is not a real date.
        pub fn due_date(&self) -> Option<NaiveDate> {
            crate::extract::resolved_due_date(&self.lines)
        }

        pub fn tags(&self) -> Vec<Tag> {
            crate::extract::tags(&self.lines)
        }

        pub fn description(&self) -> Option<&str> {
            crate::extract::description(&self.lines)
        }

        /// Same task position, lines replaced by the output of an `edit` function.
        pub fn edited(&self, edit: impl FnOnce(&[String]) -> Vec<String>) -> Task {
            Task {
                lines: edit(&self.lines),
                range: self.range,
                head_issue: self.head_issue,
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Title {
        pub line: usize,
        pub text: String,
    }

    /// An optional title plus the tasks below it, delimited by blank lines.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Group {
        pub title: Option<Title>,
        pub tasks: Vec<Task>,
        /// Every non-blank line the group owns, title and stray lines included.
        pub range: Option<LineRange>,
        /// Lines the tasks occupied when parsed; rendering rewrites exactly this span.
        pub task_region: Option<LineRange>,
    }

    impl Group {
        pub fn is_empty(&self) -> bool {
            self.title.is_none() && self.tasks.is_empty()
        }

        pub fn is_task_group(&self) -> bool {
            !self.tasks.is_empty()
        }

        pub fn title_text(&self) -> Option<&str> {
            self.title.as_ref().map(|t| t.text.as_str())
        }

        /// Title line if present, otherwise the first task line.
        pub fn header_line(&self) -> Option<usize> {
            self.title
                .as_ref()
                .map(|t| t.line)
                .or_else(|| self.tasks.first().map(|t| t.range.start))
        }

        pub(crate) fn cover(&mut self, row: usize) {
            self.range = Some(LineRange::cover(self.range, row));
        }

        pub(crate) fn set_title(&mut self, row: usize, text: &str) {
            self.title = Some(Title {
                line: row,
                text: text.to_string(),
            });
            self.cover(row);
        }

        pub(crate) fn push_task(&mut self, task: Task) {
            for row in [task.range.start, task.range.end] {
                self.cover(row);
                self.task_region = Some(LineRange::cover(self.task_region, row));
            }
            self.tasks.push(task);
        }

        /// Drops completed and obsolete tasks.
        pub fn clear_closed(&mut self) {
            self.tasks.retain(|task| !task.status().is_closed());
        }

        pub fn all_tags(&self) -> IndexSet<String> {
            self.tasks
                .iter()
                .flat_map(|task| task.tags())
                .map(|tag| tag.name)
                .collect()
        }
    }

    /* ---------------------------- Errors (domain) ---------------------------- */

    /// Contract violations and calendar-invalid dates. Malformed documents never
    /// produce one of these; they degrade into `Malformed` lines and diagnostics.
    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    pub enum XitError {
        #[error("line {line} is out of range for a document of {line_count} lines")]
        LineOutOfRange { line: usize, line_count: usize },
        #[error("`{0}` is not a valid calendar date")]
        InvalidDate(String),
        #[error("task at line {start} spans {expected} lines but {found} were supplied")]
        TaskShapeMismatch {
            start: usize,
            expected: usize,
            found: usize,
        },
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn shift_cycles_with_period_four() {
            for start in [Status::Open, Status::Ongoing, Status::Completed, Status::Obsolete] {
                let mut status = start;
                for _ in 0..4 {
                    status = status.shifted();
                }
                assert_eq!(status, start);
            }
            assert_eq!(Status::Open.shifted(), Status::Ongoing);
            assert_eq!(Status::Obsolete.shifted(), Status::Open);
        }

        #[test]
        fn toggle_returns_only_from_completed() {
            assert_eq!(Status::Completed.toggled().toggled(), Status::Completed);
            assert_eq!(Status::Ongoing.toggled(), Status::Completed);
            assert_eq!(Status::Ongoing.toggled().toggled(), Status::Open);
            assert_eq!(Status::Unknown.toggled(), Status::Unknown);
        }

        #[test]
        fn status_chars_round_trip() {
            for c in [' ', '@', 'x', '~'] {
                assert_eq!(Status::from_char(c).as_char(), Some(c));
            }
            assert_eq!(Status::from_char('e'), Status::Unknown);
            assert_eq!(Status::Unknown.as_char(), None);
        }

        #[test]
        fn date_token_display_keeps_separator() {
            let token = DateToken::new(
                DateUnit::Day {
                    year: 2022,
                    month: 5,
                    day: 3,
                },
                '/',
            );
            assert_eq!(token.to_string(), "2022/05/03");
            assert_eq!(token.normalized(), "2022-05-03");
            assert_eq!(token.granularity(), Granularity::Day);
        }

        #[test]
        fn date_token_serializes_as_string() {
            let token = DateToken::new(DateUnit::Week { year: 2022, week: 5 }, '-');
            let json = serde_json::to_string(&token).expect("serialize");
            assert_eq!(json, "\"2022-W05\"");
            let back: DateToken = serde_json::from_str(&json).expect("deserialize");
            assert_eq!(back, token);
            assert!(serde_json::from_str::<DateToken>("\"22-05\"").is_err());
        }
    }
}

pub mod grammar {
    //! Grammar masks: the lexical shapes every other module agrees on.
    //!
    //! Checkbox, priority marker, date token and tag are each a `nom` parser here;
    //! the classifier, extractor and linter never re-derive them.

    use crate::core::{DateToken, DateUnit, Malformed, Tag};
    use nom::{
        IResult,
        branch::alt,
        bytes::complete::{take_while, take_while_m_n, take_while1},
        character::complete::{char, none_of, satisfy, space1},
        combinator::{all_consuming, map, map_res, opt, peek, value},
        error::VerboseError,
        sequence::{delimited, pair, preceded, terminated, tuple},
    };

    pub const VALID_STATUS_CHARS: &str = " @x~";
    pub const INDENT_WIDTH: usize = 4;
    pub const DATE_ARROW: &str = "-> ";
    /// Byte offset right after `[c] ` for a known status character.
    const PRIORITY_OFFSET: usize = 4;

    type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

    /* ------------------------------- Lines ------------------------------- */

    pub fn is_blank(line: &str) -> bool {
        line.trim().is_empty()
    }

    /// Number of leading spaces (tabs do not count).
    pub fn indentation(line: &str) -> usize {
        line.len() - line.trim_start_matches(' ').len()
    }

    /// At least `INDENT_WIDTH` spaces followed by a non-space character.
    pub fn is_indented(line: &str) -> bool {
        let indent = indentation(line);
        indent >= INDENT_WIDTH && line[indent..].chars().next().is_some_and(|c| !c.is_whitespace())
    }

    pub fn is_wrong_title_start(line: &str) -> bool {
        line.starts_with(|c: char| c.is_whitespace() || c == '[')
    }

    /// Character column of a byte offset within `line`.
    pub fn col(line: &str, byte: usize) -> usize {
        line.get(..byte).map_or(0, |s| s.chars().count())
    }

    /* ------------------------------ Checkbox ------------------------------ */

    fn checkbox_shape(i: &str) -> PResult<'_, char> {
        delimited(char('['), none_of("]"), char(']'))(i)
    }

    /// `[c]` with any single status character; returns it with the rest of the line.
    pub fn checkbox(line: &str) -> Option<(char, &str)> {
        checkbox_shape(line).ok().map(|(rest, status)| (status, rest))
    }

    /// Full head check: `[c]` with a known status, then a space or end of line.
    pub fn check_checkbox(line: &str) -> Result<char, Malformed> {
        let (status, rest) = checkbox(line).ok_or(Malformed::NoClosingBracket)?;
        if !VALID_STATUS_CHARS.contains(status) {
            return Err(Malformed::InvalidStatus);
        }
        if !(rest.is_empty() || rest.starts_with(' ')) {
            return Err(Malformed::MissingSpace);
        }
        Ok(status)
    }

    /// Width in characters of the leading bracket region, up to the first `]`.
    pub fn bracket_region(line: &str) -> usize {
        match line.find(']') {
            Some(close) => col(line, close + 1),
            None => 1,
        }
    }

    /* ------------------------------ Priority ------------------------------ */

    fn priority_chars(i: &str) -> PResult<'_, &str> {
        take_while1(|c: char| c == '!' || c == '.')(i)
    }

    /// `!+\.*` or `\.+!*`, which together cover `.*!+` as well.
    fn priority_shape(i: &str) -> PResult<'_, (&str, &str)> {
        alt((
            pair(take_while1(|c: char| c == '!'), take_while(|c: char| c == '.')),
            pair(take_while1(|c: char| c == '.'), take_while(|c: char| c == '!')),
        ))(i)
    }

    pub fn is_priority_shape(run: &str) -> bool {
        all_consuming(priority_shape)(run).is_ok()
    }

    fn spaces(i: &str) -> PResult<'_, &str> {
        space1(i)
    }

    /// The `!`/`.` word right after a valid `[c] `, whatever its shape.
    pub fn priority_run(line: &str) -> Option<(usize, &str)> {
        check_checkbox(line).ok()?;
        let rest = line.get(PRIORITY_OFFSET..)?;
        let (after, run) = priority_chars(rest).ok()?;
        (after.is_empty() || after.starts_with(' ')).then_some((PRIORITY_OFFSET, run))
    }

    /// A well-shaped priority marker followed by spaces and a description.
    pub fn priority_marker(line: &str) -> Option<(usize, &str)> {
        let (start, run) = priority_run(line)?;
        let after = &line[start + run.len()..];
        let described = spaces(after).is_ok_and(|(rest, _)| !rest.is_empty());
        (described && is_priority_shape(run)).then_some((start, run))
    }

    /* ------------------------------ Due dates ------------------------------ */

    /// Location of a date token; offsets are bytes within its line.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DateMatch {
        pub arrow: usize,
        pub start: usize,
        pub end: usize,
        pub token: DateToken,
    }

    fn is_word(c: char) -> bool {
        c.is_ascii_alphanumeric() || c == '_'
    }

    /// Characters allowed right before `->`.
    fn opens_date(c: char) -> bool {
        c == ' ' || !(is_word(c) || c.is_whitespace() || c == '/' || c == '-')
    }

    /// Characters allowed right after the token (end of line is allowed too).
    fn closes_date(c: char) -> bool {
        c == ' ' || !(is_word(c) || c.is_whitespace() || matches!(c, '?' | '/' | '-'))
    }

    fn year(i: &str) -> PResult<'_, i32> {
        map_res(take_while_m_n(4, 4, |c: char| c.is_ascii_digit()), |s: &str| {
            s.parse::<i32>()
        })(i)
    }

    fn digits(n: usize) -> impl Fn(&str) -> PResult<'_, u32> {
        move |i: &str| {
            map_res(take_while_m_n(n, n, |c: char| c.is_ascii_digit()), |s: &str| {
                s.parse::<u32>()
            })(i)
        }
    }

    /// Longest shape first.
    fn date_unit(sep: char) -> impl Fn(&str) -> PResult<'_, DateUnit> {
        move |i: &str| {
            alt((
                map(
                    tuple((year, char(sep), digits(2), char(sep), digits(2))),
                    |(year, _, month, _, day)| DateUnit::Day { year, month, day },
                ),
                map(
                    tuple((year, char(sep), preceded(char('W'), digits(2)))),
                    |(year, _, week)| DateUnit::Week { year, week },
                ),
                map(
                    tuple((year, char(sep), preceded(char('Q'), digits(1)))),
                    |(year, _, quarter)| DateUnit::Quarter { year, quarter },
                ),
                map(tuple((year, char(sep), digits(2))), |(year, _, month)| {
                    DateUnit::Month { year, month }
                }),
                map(year, |year| DateUnit::Year { year }),
            ))(i)
        }
    }

    fn date_end(i: &str) -> PResult<'_, ()> {
        if i.is_empty() {
            return Ok((i, ()));
        }
        value((), peek(satisfy(closes_date)))(i)
    }

    fn date_token(i: &str) -> PResult<'_, DateToken> {
        alt((
            map(terminated(date_unit('-'), date_end), |unit| {
                DateToken::new(unit, '-')
            }),
            map(terminated(date_unit('/'), date_end), |unit| {
                DateToken::new(unit, '/')
            }),
        ))(i)
    }

    /// Parse a bare token such as `2022-Q3` (no arrow, nothing around it).
    pub fn parse_date_token(s: &str) -> Option<DateToken> {
        alt((
            map(all_consuming(date_unit('-')), |unit| DateToken::new(unit, '-')),
            map(all_consuming(date_unit('/')), |unit| DateToken::new(unit, '/')),
        ))(s)
        .ok()
        .map(|(_, token)| token)
    }

    /// First `-> <token>` in `line` that respects the boundary rules.
    pub fn find_date(line: &str) -> Option<DateMatch> {
        for (arrow, _) in line.match_indices(DATE_ARROW) {
            let Some(prev) = line[..arrow].chars().next_back() else {
                continue;
            };
            if !opens_date(prev) {
                continue;
            }
            let start = arrow + DATE_ARROW.len();
            if let Ok((rest, token)) = date_token(&line[start..]) {
                return Some(DateMatch {
                    arrow,
                    start,
                    end: line.len() - rest.len(),
                    token,
                });
            }
        }
        None
    }

    /* -------------------------------- Tags -------------------------------- */

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct TagMatch {
        pub start: usize,
        pub end: usize,
        pub tag: Tag,
    }

    fn is_tag_char(c: char) -> bool {
        c.is_alphanumeric() || c == '_' || c == '-'
    }

    /// `#` only starts a tag at the beginning of a token.
    fn opens_tag(prev: Option<char>) -> bool {
        prev.is_none_or(|c| !(is_tag_char(c) || matches!(c, '#' | '"' | '\'')))
    }

    fn tag_value(i: &str) -> PResult<'_, &str> {
        preceded(
            char('='),
            alt((
                delimited(char('"'), take_while(|c: char| c != '"' && c != '\n'), char('"')),
                delimited(char('\''), take_while(|c: char| c != '\'' && c != '\n'), char('\'')),
                take_while1(is_tag_char),
            )),
        )(i)
    }

    fn hashtag(i: &str) -> PResult<'_, Tag> {
        map(
            preceded(char('#'), pair(take_while1(is_tag_char), opt(tag_value))),
            |(name, value): (&str, Option<&str>)| Tag::new(name, value.map(str::to_string)),
        )(i)
    }

    pub fn find_tags(line: &str) -> Vec<TagMatch> {
        let mut out = Vec::new();
        let mut pos = 0;
        while let Some(offset) = line[pos..].find('#') {
            let start = pos + offset;
            if opens_tag(line[..start].chars().next_back()) {
                if let Ok((rest, tag)) = hashtag(&line[start..]) {
                    let end = line.len() - rest.len();
                    out.push(TagMatch { start, end, tag });
                    pos = end;
                    continue;
                }
            }
            pos = start + 1;
        }
        out
    }

}

pub mod classify {
    //! Line classifier. A line's kind depends on the line itself plus whether a task
    //! is currently open and what the previous line was.

    use crate::core::{LineKind, Malformed};
    use crate::grammar;

    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct ClassifyContext {
        pub task_open: bool,
        pub previous: Option<LineKind>,
    }

    impl ClassifyContext {
        pub fn advance(&mut self, kind: LineKind) {
            self.task_open = kind.keeps_task_open();
            self.previous = Some(kind);
        }
    }

    pub fn classify(line: &str, ctx: &ClassifyContext) -> LineKind {
        if grammar::is_blank(line) {
            return LineKind::Blank;
        }
        if line.starts_with('[') {
            return match grammar::check_checkbox(line) {
                Ok(_) => LineKind::TaskHead,
                Err(reason) => LineKind::Malformed(reason),
            };
        }
        if grammar::is_indented(line) {
            return if ctx.task_open {
                LineKind::Continuation
            } else {
                LineKind::Malformed(Malformed::UnexpectedIndent)
            };
        }
        if ctx.previous.is_some_and(LineKind::is_title_like) {
            return LineKind::Malformed(Malformed::MultipleTitles);
        }
        LineKind::Title
    }

    pub fn classify_all<S: AsRef<str>>(lines: &[S]) -> Vec<LineKind> {
        let mut ctx = ClassifyContext::default();
        lines
            .iter()
            .map(|line| {
                let kind = classify(line.as_ref(), &ctx);
                ctx.advance(kind);
                kind
            })
            .collect()
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn classifies_a_small_document() {
            let kinds = classify_all(&[
                "Groceries",
                "[ ] Bread",
                "    wholegrain",
                "",
                "    stray",
                "Work",
                "Other",
                "[e] broken",
                "    still part of it",
            ]);
            assert_eq!(
                kinds,
                [
                    LineKind::Title,
                    LineKind::TaskHead,
                    LineKind::Continuation,
                    LineKind::Blank,
                    LineKind::Malformed(Malformed::UnexpectedIndent),
                    LineKind::Title,
                    LineKind::Malformed(Malformed::MultipleTitles),
                    LineKind::Malformed(Malformed::InvalidStatus),
                    LineKind::Continuation,
                ]
            );
        }

        #[test]
        fn shallow_indent_is_not_a_continuation() {
            let kinds = classify_all(&["[ ] a", "  two spaces"]);
            assert_eq!(kinds[1], LineKind::Title);
        }

        #[test]
        fn whitespace_only_is_blank() {
            let ctx = ClassifyContext::default();
            assert_eq!(classify("   \t", &ctx), LineKind::Blank);
        }
    }
}

pub mod extract {
    //! Field extraction over a task's lines. Status and priority only ever come from
    //! the head line; due date and tags may sit on any line.

    use crate::core::{DateToken, Status, Tag};
    use crate::dates;
    use crate::grammar::{self, DateMatch};
    use chrono::NaiveDate;

    fn head(lines: &[String]) -> &str {
        lines.first().map(String::as_str).unwrap_or("")
    }

    pub fn status(lines: &[String]) -> Status {
        grammar::checkbox(head(lines))
            .map(|(c, _)| Status::from_char(c))
            .unwrap_or(Status::Unknown)
    }

    pub fn priority_marker(lines: &[String]) -> Option<&str> {
        grammar::priority_marker(head(lines)).map(|(_, run)| run)
    }

    /// Number of `!` in the marker; dots only pad.
    pub fn priority(lines: &[String]) -> usize {
        priority_marker(lines).map_or(0, |marker| marker.matches('!').count())
    }

    /// First date token in line order, with the index of the line holding it.
    pub fn due_date(lines: &[String]) -> Option<(usize, DateMatch)> {
        lines
            .iter()
            .enumerate()
            .find_map(|(row, line)| grammar::find_date(line).map(|m| (row, m)))
    }

    pub fn due_date_token(lines: &[String]) -> Option<DateToken> {
        due_date(lines).map(|(_, m)| m.token)
    }

    pub fn resolved_due_date(lines: &[String]) -> Option<NaiveDate> {
        due_date_token(lines).and_then(|token| dates::resolve_due_date(&token).ok())
    }

    pub fn tags(lines: &[String]) -> Vec<Tag> {
        lines
            .iter()
            .flat_map(|line| grammar::find_tags(line))
            .map(|m| m.tag)
            .collect()
    }

    /// Head text after the checkbox and priority marker; absent when the checkbox
    /// is not closed or not followed by a space.
    pub fn description(lines: &[String]) -> Option<&str> {
        let head = head(lines);
        let (_, rest) = grammar::checkbox(head)?;
        if !(rest.is_empty() || rest.starts_with(' ')) {
            return None;
        }
        let text = match grammar::priority_marker(head) {
            Some((start, run)) => &head[start + run.len()..],
            None => rest,
        }
        .trim();
        (!text.is_empty()).then_some(text)
    }

}

pub mod dates {
    //! Calendar arithmetic for due-date tokens: resolution to the last day of the
    //! period, validity checks, period rollover, and "current period" tokens.
    //!
    //! Weeks are ISO 8601 weeks: Monday first, week 1 holds the first Thursday.

    use crate::core::{DateToken, DateUnit, Granularity, XitError};
    use chrono::{Datelike, Duration, NaiveDate, Weekday};

    pub fn is_leap_year(year: i32) -> bool {
        year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
    }

    /// 0 for a month outside 1..=12.
    pub fn days_in_month(year: i32, month: u32) -> u32 {
        match month {
            1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
            4 | 6 | 9 | 11 => 30,
            2 if is_leap_year(year) => 29,
            2 => 28,
            _ => 0,
        }
    }

    /// Monday of week 1.
    pub fn week_start(year: i32) -> Option<NaiveDate> {
        let jan1 = NaiveDate::from_ymd_opt(year, 1, 1)?;
        let wd = i64::from(jan1.weekday().num_days_from_sunday());
        let shift = match wd {
            0 => 1,
            1..=4 => -(wd - 1),
            _ => 8 - wd,
        };
        jan1.checked_add_signed(Duration::days(shift))
    }

    /// 52 or 53.
    pub fn weeks_in_year(year: i32) -> Option<u32> {
        let dec31 = NaiveDate::from_ymd_opt(year, 12, 31)?;
        let wd = i64::from(dec31.weekday().num_days_from_sunday());
        let shift = if wd < 4 { -wd } else { 7 - wd };
        let last_sunday = dec31.checked_add_signed(Duration::days(shift))?;
        let span = (last_sunday - week_start(year)?).num_days();
        u32::try_from(span / 7 + 1).ok()
    }

    /// Calendar validity of the raw numbers in a token.
    pub fn check_date(token: &DateToken) -> Result<(), XitError> {
        let valid = match token.unit {
            DateUnit::Day { year, month, day } => {
                day >= 1 && day <= days_in_month(year, month)
            }
            DateUnit::Week { year, week } => {
                week >= 1 && weeks_in_year(year).is_some_and(|last| week <= last)
            }
            DateUnit::Month { month, .. } => (1..=12).contains(&month),
            DateUnit::Quarter { quarter, .. } => (1..=4).contains(&quarter),
            DateUnit::Year { .. } => true,
        };
        if valid {
            Ok(())
        } else {
            Err(XitError::InvalidDate(token.to_string()))
        }
    }

    fn last_of_month(year: i32, month: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(year, month, days_in_month(year, month))
    }

    /// Last calendar day the token covers: a week ends on Sunday, a month, quarter
    /// or year on its final day.
    pub fn resolve_due_date(token: &DateToken) -> Result<NaiveDate, XitError> {
        check_date(token)?;
        let resolved = match token.unit {
            DateUnit::Day { year, month, day } => NaiveDate::from_ymd_opt(year, month, day),
            DateUnit::Week { year, week } => week_start(year).and_then(|monday| {
                monday.checked_add_signed(Duration::days(i64::from(week - 1) * 7 + 6))
            }),
            DateUnit::Month { year, month } => last_of_month(year, month),
            DateUnit::Quarter { year, quarter } => last_of_month(year, quarter * 3),
            DateUnit::Year { year } => NaiveDate::from_ymd_opt(year, 12, 31),
        };
        resolved.ok_or_else(|| XitError::InvalidDate(token.to_string()))
    }

    /// Move by one unit in the range `1..=last`, rolling the year when leaving it.
    fn step_cycle(year: i32, value: u32, last: u32, forward: bool) -> (i32, u32) {
        if forward {
            if value >= last { (year + 1, 1) } else { (year, value + 1) }
        } else if value <= 1 {
            (year - 1, 0)
        } else {
            (year, value - 1)
        }
    }

    fn step_month(year: i32, month: u32, forward: bool) -> (i32, u32) {
        match step_cycle(year, month, 12, forward) {
            (year, 0) => (year, 12),
            stepped => stepped,
        }
    }

    fn step(unit: DateUnit, forward: bool) -> DateUnit {
        match unit {
            DateUnit::Year { year } => DateUnit::Year {
                year: if forward { year + 1 } else { year - 1 },
            },
            DateUnit::Quarter { year, quarter } => {
                let (year, quarter) = match step_cycle(year, quarter, 4, forward) {
                    (year, 0) => (year, 4),
                    stepped => stepped,
                };
                DateUnit::Quarter { year, quarter }
            }
            DateUnit::Month { year, month } => {
                let (year, month) = step_month(year, month, forward);
                DateUnit::Month { year, month }
            }
            DateUnit::Week { year, week } => {
                let last = weeks_in_year(year).unwrap_or(52);
                let (year, week) = match step_cycle(year, week, last, forward) {
                    (year, 0) => (year, weeks_in_year(year).unwrap_or(52)),
                    stepped => stepped,
                };
                DateUnit::Week { year, week }
            }
            DateUnit::Day { year, month, day } => {
                let last = days_in_month(year, month);
                match step_cycle(year, day, last, forward) {
                    (y, day) if y == year => DateUnit::Day { year, month, day },
                    _ if forward => {
                        let (year, month) = step_month(year, month, true);
                        DateUnit::Day { year, month, day: 1 }
                    }
                    _ => {
                        let (year, month) = step_month(year, month, false);
                        let day = days_in_month(year, month).max(1);
                        DateUnit::Day { year, month, day }
                    }
                }
            }
        }
    }

    /// Years a four-digit token can spell.
    const TOKEN_YEARS: std::ops::RangeInclusive<i32> = 0..=9999;

    /// Shift by `delta` units of the token's own granularity. Works on the raw
    /// numbers, so it also moves tokens that are not valid dates. A step that
    /// would leave years 0000..=9999 is not taken.
    pub fn shift_date(token: &DateToken, delta: i32) -> DateToken {
        let forward = delta > 0;
        let unit = (0..delta.unsigned_abs()).fold(token.unit, |unit, _| {
            let next = step(unit, forward);
            if TOKEN_YEARS.contains(&DateToken::new(next, token.separator).year()) {
                next
            } else {
                unit
            }
        });
        DateToken::new(unit, token.separator)
    }

    /// Token naming the period of `granularity` that contains `today`.
    pub fn current_period(granularity: Granularity, today: NaiveDate) -> DateToken {
        let year = today.year();
        let unit = match granularity {
            Granularity::Day => DateUnit::Day {
                year,
                month: today.month(),
                day: today.day(),
            },
            Granularity::Week => {
                let week = today.iso_week();
                DateUnit::Week {
                    year: week.year(),
                    week: week.week(),
                }
            }
            Granularity::Month => DateUnit::Month {
                year,
                month: today.month(),
            },
            Granularity::Quarter => DateUnit::Quarter {
                year,
                quarter: (today.month() - 1) / 3 + 1,
            },
            Granularity::Year => DateUnit::Year { year },
        };
        DateToken::new(unit, '-')
    }

    /// Monday of the ISO week the token names, when it is a week token.
    pub fn week_monday(token: &DateToken) -> Option<NaiveDate> {
        match token.unit {
            DateUnit::Week { year, week } => NaiveDate::from_isoywd_opt(year, week, Weekday::Mon),
            _ => None,
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::grammar::parse_date_token;

        fn token(s: &str) -> DateToken {
            parse_date_token(s).unwrap_or_else(|| panic!("bad token {s}"))
        }

        fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
            NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
        }

        #[test]
        fn resolves_to_end_of_period() {
            assert_eq!(resolve_due_date(&token("2022-03")), Ok(ymd(2022, 3, 31)));
            assert_eq!(resolve_due_date(&token("2022-Q1")), Ok(ymd(2022, 3, 31)));
            assert_eq!(resolve_due_date(&token("2022-W01")), Ok(ymd(2022, 1, 9)));
            assert_eq!(resolve_due_date(&token("2024/02")), Ok(ymd(2024, 2, 29)));
            assert_eq!(resolve_due_date(&token("2022")), Ok(ymd(2022, 12, 31)));
            assert_eq!(resolve_due_date(&token("2022-05-03")), Ok(ymd(2022, 5, 3)));
        }

        #[test]
        fn rejects_impossible_dates() {
            for bad in ["2022-02-30", "2022-13-01", "2022-00", "2022-Q5", "2022-W53", "2022-W00"] {
                assert_eq!(
                    resolve_due_date(&token(bad)),
                    Err(XitError::InvalidDate(bad.to_string())),
                    "{bad}"
                );
            }
            assert!(check_date(&token("2020-W53")).is_ok());
            assert!(check_date(&token("2024-02-29")).is_ok());
        }

        #[test]
        fn leap_years() {
            assert!(is_leap_year(2000));
            assert!(is_leap_year(2024));
            assert!(!is_leap_year(1900));
            assert!(!is_leap_year(2023));
            assert_eq!(days_in_month(2023, 2), 28);
            assert_eq!(days_in_month(2023, 13), 0);
        }

        #[test]
        fn week_math_matches_iso_calendar() {
            assert_eq!(weeks_in_year(2022), Some(52));
            assert_eq!(weeks_in_year(2020), Some(53));
            for year in 1990..=2040 {
                assert_eq!(
                    week_start(year),
                    NaiveDate::from_isoywd_opt(year, 1, Weekday::Mon),
                    "{year}"
                );
                assert_eq!(
                    weeks_in_year(year),
                    Some(ymd(year, 12, 28).iso_week().week()),
                    "{year}"
                );
            }
        }

        #[test]
        fn shifts_roll_over_period_boundaries() {
            let cases = [
                ("2022-12", 1, "2023-01"),
                ("2022-Q4", 1, "2023-Q1"),
                ("2022-W52", 1, "2023-W01"),
                ("2021-W01", -1, "2020-W53"),
                ("2024-02-28", 1, "2024-02-29"),
                ("2022-01-01", -1, "2021-12-31"),
                ("2022-03-01", -1, "2022-02-28"),
                ("2022", -3, "2019"),
                ("2022-05-03", 0, "2022-05-03"),
                ("2022-01-30", 3, "2022-02-02"),
            ];
            for (input, delta, expected) in cases {
                assert_eq!(shift_date(&token(input), delta).to_string(), expected, "{input} {delta:+}");
            }
        }

        #[test]
        fn shift_keeps_separator_and_round_trips() {
            let start = token("2022/W52");
            let forward = shift_date(&start, 1);
            assert_eq!(forward.to_string(), "2023/W01");
            assert_eq!(shift_date(&forward, -1), start);
            for s in ["2020-12-31", "2021-Q1", "2020-W53", "2000-02-29"] {
                let t = token(s);
                assert_eq!(shift_date(&shift_date(&t, 1), -1), t, "{s}");
            }
        }

        #[test]
        fn shifts_stop_at_four_digit_years() {
            for (input, delta) in [
                ("9999", 1),
                ("0000", -1),
                ("9999-12-31", 1),
                ("9999-Q4", 2),
                ("0000-01", -1),
                ("0000/W01", -1),
            ] {
                assert_eq!(shift_date(&token(input), delta).to_string(), input, "{input} {delta:+}");
            }
            assert_eq!(shift_date(&token("9999-12-30"), 5).to_string(), "9999-12-31");
            let shifted = shift_date(&token("9998"), 3).to_string();
            assert_eq!(parse_date_token(&shifted).map(|t| t.to_string()), Some("9999".to_string()));
        }

        #[test]
        fn current_period_uses_iso_week_year() {
            let today = ymd(2021, 1, 2);
            assert_eq!(current_period(Granularity::Week, today).to_string(), "2020-W53");
            assert_eq!(current_period(Granularity::Day, today).to_string(), "2021-01-02");
            assert_eq!(current_period(Granularity::Month, today).to_string(), "2021-01");
            assert_eq!(current_period(Granularity::Quarter, ymd(2021, 11, 5)).to_string(), "2021-Q4");
            assert_eq!(current_period(Granularity::Year, today).to_string(), "2021");
        }

        #[test]
        fn week_monday_for_week_tokens() {
            assert_eq!(week_monday(&token("2022-W01")), Some(ymd(2022, 1, 3)));
            assert_eq!(week_monday(&token("2022-01")), None);
        }
    }
}

pub mod parser {
    //! Structural parser: one left-to-right pass over classified lines that
    //! accumulates tasks into groups.
    //!
    //! - A bracket line closes the open task and opens a new one, even when its
    //!   checkbox is broken (the reason is kept in `Task::head_issue`).
    //! - A continuation appends to the open task.
    //! - A blank line closes the task, then the group.
    //! - A title, repeated ones included, closes the task and, unless the group is
    //!   still empty, the group.
    //! - A stray indented line closes the task and stays inside the group's range.

    use crate::classify::classify_all;
    use crate::core::*;
    use indexmap::IndexSet;
    use serde::Serialize;
    use std::mem;

    /// Split raw text into lines; a trailing newline yields a final empty line.
    pub fn split_lines(text: &str) -> Vec<String> {
        text.split('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
            .collect()
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct ParsedDocument {
        pub groups: Vec<Group>,
        /// Classification of every input line, by line number.
        pub kinds: Vec<LineKind>,
        /// False when at least one line was classified as malformed.
        pub ok: bool,
    }

    impl ParsedDocument {
        pub fn line_count(&self) -> usize {
            self.kinds.len()
        }

        pub fn tasks(&self) -> impl Iterator<Item = &Task> {
            self.groups.iter().flat_map(|group| group.tasks.iter())
        }

        /// Task whose head or continuation covers `line`.
        pub fn task_at_line(&self, line: usize) -> Result<Option<&Task>, XitError> {
            if line >= self.line_count() {
                return Err(XitError::LineOutOfRange {
                    line,
                    line_count: self.line_count(),
                });
            }
            Ok(self.tasks().find(|task| task.range.contains(line)))
        }

        /// Distinct tasks touched by any of `lines`, in document order. Lines outside
        /// the document or outside every task are ignored.
        pub fn tasks_touching(&self, lines: impl IntoIterator<Item = usize>) -> Vec<&Task> {
            let mut touched: Vec<&Task> = lines
                .into_iter()
                .filter_map(|line| self.task_at_line(line).ok().flatten())
                .collect();
            touched.sort_by_key(|task| task.range.start);
            touched.dedup_by_key(|task| task.range.start);
            touched
        }

        pub fn all_tags(&self) -> IndexSet<String> {
            all_tags(&self.groups)
        }
    }

    #[derive(Default)]
    struct Builder {
        groups: Vec<Group>,
        group: Group,
        task: Option<Task>,
    }

    impl Builder {
        fn accept(&mut self, row: usize, line: &str, kind: LineKind) {
            match kind {
                LineKind::Blank => self.close_group(),
                LineKind::TaskHead => self.open_task(row, line, None),
                LineKind::Malformed(reason) if reason.is_checkbox_issue() => {
                    self.open_task(row, line, Some(reason))
                }
                LineKind::Continuation => match self.task.as_mut() {
                    Some(task) => task.push_line(line),
                    None => self.group.cover(row),
                },
                LineKind::Title | LineKind::Malformed(Malformed::MultipleTitles) => {
                    self.close_task();
                    if !self.group.is_empty() {
                        self.close_group();
                    }
                    self.group.set_title(row, line);
                }
                LineKind::Malformed(_) => {
                    self.close_task();
                    self.group.cover(row);
                }
            }
        }

        fn open_task(&mut self, row: usize, line: &str, issue: Option<Malformed>) {
            self.close_task();
            self.task = Some(Task::new(row, line, issue));
        }

        fn close_task(&mut self) {
            if let Some(task) = self.task.take() {
                self.group.push_task(task);
            }
        }

        fn close_group(&mut self) {
            self.close_task();
            let group = mem::take(&mut self.group);
            if !group.is_empty() {
                self.groups.push(group);
            }
        }

        fn finish(mut self) -> Vec<Group> {
            self.close_group();
            self.groups
        }
    }

    /// Never fails: malformed lines degrade into `LineKind::Malformed` entries.
    pub fn parse_document<S: AsRef<str>>(lines: &[S]) -> ParsedDocument {
        let kinds = classify_all(lines);
        let mut builder = Builder::default();
        for (row, (line, kind)) in lines.iter().zip(&kinds).enumerate() {
            builder.accept(row, line.as_ref(), *kind);
        }
        let groups = builder.finish();
        let ok = !kinds.iter().any(|kind| kind.is_malformed());
        tracing::debug!(
            lines = kinds.len(),
            groups = groups.len(),
            tasks = groups.iter().map(|g| g.tasks.len()).sum::<usize>(),
            ok,
            "parsed document"
        );
        ParsedDocument { groups, kinds, ok }
    }

    pub fn parse_text(text: &str) -> ParsedDocument {
        parse_document(&split_lines(text))
    }

    /// Tag names across the whole document, first occurrence first.
    pub fn all_tags(groups: &[Group]) -> IndexSet<String> {
        groups.iter().flat_map(Group::all_tags).collect()
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        const SAMPLE: &str = "Groceries\n[ ] Bread\n    wholegrain #shop\n[x] Milk\n\n[@] Call mom #family\n\nWork\n[ ] !! Report -> 2022-W05 #work\n";

        #[test]
        fn parses_groups_and_tasks() {
            let doc = parse_text(SAMPLE);
            assert!(doc.ok);
            assert_eq!(doc.groups.len(), 3);

            let groceries = &doc.groups[0];
            assert_eq!(groceries.title_text(), Some("Groceries"));
            assert_eq!(groceries.tasks.len(), 2);
            assert_eq!(groceries.tasks[0].lines, ["[ ] Bread", "    wholegrain #shop"]);
            assert_eq!(groceries.tasks[0].range, LineRange { start: 1, end: 2 });
            assert_eq!(groceries.tasks[1].status(), Status::Completed);
            assert_eq!(groceries.range, Some(LineRange { start: 0, end: 3 }));
            assert_eq!(groceries.task_region, Some(LineRange { start: 1, end: 3 }));

            let untitled = &doc.groups[1];
            assert_eq!(untitled.title, None);
            assert_eq!(untitled.header_line(), Some(5));
            assert_eq!(untitled.tasks[0].status(), Status::Ongoing);

            let work = &doc.groups[2];
            assert_eq!(work.title_text(), Some("Work"));
            assert_eq!(work.tasks[0].priority(), 2);
            assert_eq!(work.tasks[0].due_date_token().map(|t| t.normalized()), Some("2022-W05".into()));
        }

        #[test]
        fn tags_are_collected_once() {
            let doc = parse_text("[ ] a #x #y\n[ ] b #x\n\n[ ] c #z #y\n");
            let tags: Vec<String> = doc.all_tags().into_iter().collect();
            assert_eq!(tags, ["x", "y", "z"]);
        }

        #[test]
        fn malformed_lines_still_produce_tasks() {
            let doc = parse_text("[e] odd\n[ ]tight\n[ no bracket\n");
            assert!(!doc.ok);
            let tasks: Vec<&Task> = doc.tasks().collect();
            assert_eq!(tasks.len(), 3);
            assert_eq!(tasks[0].status(), Status::Unknown);
            assert_eq!(tasks[0].head_issue, Some(Malformed::InvalidStatus));
            assert_eq!(tasks[1].head_issue, Some(Malformed::MissingSpace));
            assert_eq!(tasks[2].head_issue, Some(Malformed::NoClosingBracket));
        }

        #[test]
        fn title_after_tasks_starts_a_new_group() {
            let doc = parse_text("[ ] a\nNext\n[ ] b\n");
            assert_eq!(doc.groups.len(), 2);
            assert_eq!(doc.groups[1].title_text(), Some("Next"));
            assert_eq!(doc.groups[1].tasks.len(), 1);
        }

        #[test]
        fn second_title_opens_a_new_group() {
            let doc = parse_text("One\nTwo\n[ ] a\n");
            assert_eq!(doc.kinds[1], LineKind::Malformed(Malformed::MultipleTitles));
            assert!(!doc.ok);
            assert_eq!(doc.groups.len(), 2);
            assert_eq!(doc.groups[0].title_text(), Some("One"));
            assert!(doc.groups[0].tasks.is_empty());
            assert_eq!(doc.groups[0].range, Some(LineRange { start: 0, end: 0 }));
            assert_eq!(doc.groups[1].title_text(), Some("Two"));
            assert_eq!(doc.groups[1].tasks.len(), 1);
            assert_eq!(doc.groups[1].range, Some(LineRange { start: 1, end: 2 }));
        }

        #[test]
        fn stray_indent_keeps_the_following_title() {
            let doc = parse_text("    stray\nGroceries\n[ ] Bread\n");
            assert_eq!(doc.kinds[0], LineKind::Malformed(Malformed::UnexpectedIndent));
            assert_eq!(doc.kinds[1], LineKind::Title);
            assert_eq!(doc.groups.len(), 1);
            assert_eq!(doc.groups[0].title_text(), Some("Groceries"));
            assert_eq!(doc.groups[0].tasks.len(), 1);
            assert_eq!(doc.groups[0].range, Some(LineRange { start: 0, end: 2 }));
        }

        #[test]
        fn empty_input_has_no_groups() {
            let doc = parse_text("");
            assert!(doc.groups.is_empty());
            assert!(doc.ok);
            assert_eq!(doc.line_count(), 1);
            let doc = parse_text("\n\n\n");
            assert!(doc.groups.is_empty());
        }

        #[test]
        fn crlf_lines_are_trimmed() {
            assert_eq!(split_lines("a\r\nb\r\n"), ["a", "b", ""]);
        }

        #[test]
        fn finds_tasks_by_line() {
            let doc = parse_text(SAMPLE);
            let task = doc.task_at_line(2).expect("in range").expect("task");
            assert_eq!(task.range.start, 1);
            assert_eq!(doc.task_at_line(0), Ok(None));
            assert_eq!(
                doc.task_at_line(99),
                Err(XitError::LineOutOfRange {
                    line: 99,
                    line_count: 10
                })
            );

            let touched: Vec<usize> = doc
                .tasks_touching([2, 1, 3, 8, 42])
                .into_iter()
                .map(|task| task.range.start)
                .collect();
            assert_eq!(touched, [1, 3, 8]);
        }
    }
}

pub mod edit {
    //! Pure per-task mutators. Each takes a task's lines and returns the updated
    //! lines; applying them to a document is `format::splice_task`'s job.

    use crate::core::Status;
    use crate::dates;
    use crate::extract;
    use crate::grammar;

    fn with_head(lines: &[String], head: String) -> Vec<String> {
        let mut out = lines.to_vec();
        match out.first_mut() {
            Some(first) => *first = head,
            None => out.push(head),
        }
        out
    }

    fn head(lines: &[String]) -> &str {
        lines.first().map(String::as_str).unwrap_or("")
    }

    /// Rewrite the checkbox character. Lines without a `[c]` shape, and the
    /// `Unknown` status, leave the task untouched.
    pub fn set_status(lines: &[String], status: Status) -> Vec<String> {
        let head = head(lines);
        let (Some(new), Some((old, _))) = (status.as_char(), grammar::checkbox(head)) else {
            return lines.to_vec();
        };
        let rest = &head[1 + old.len_utf8()..];
        tracing::trace!(from = %old, to = %new, "set status");
        with_head(lines, format!("[{new}{rest}"))
    }

    pub fn shift_status(lines: &[String]) -> Vec<String> {
        set_status(lines, extract::status(lines).shifted())
    }

    pub fn toggle_status(lines: &[String]) -> Vec<String> {
        set_status(lines, extract::status(lines).toggled())
    }

    /// Current marker and its offset if it has a valid shape, description or not.
    /// A run like `!.!` is description text and never a marker.
    fn current_marker(head: &str) -> Option<(usize, &str)> {
        grammar::priority_run(head).filter(|(_, run)| grammar::is_priority_shape(run))
    }

    /// Replace the priority marker (an empty marker removes it), or insert one in
    /// front of the description. Heads without a valid checkbox are left untouched.
    pub fn set_priority_marker(lines: &[String], marker: &str) -> Vec<String> {
        let head = head(lines);
        if let Some((start, run)) = current_marker(head) {
            let after = &head[start + run.len()..];
            let updated = if marker.is_empty() {
                format!("{}{}", &head[..start], after.trim_start_matches(' '))
            } else {
                format!("{}{marker}{after}", &head[..start])
            };
            return with_head(lines, updated);
        }
        if marker.is_empty() || grammar::check_checkbox(head).is_err() {
            return lines.to_vec();
        }
        let updated = match head.get(4..) {
            Some(rest) if !rest.is_empty() => format!("{} {marker} {rest}", &head[..3]),
            _ => format!("{} {marker}", &head[..3]),
        };
        with_head(lines, updated)
    }

    /// `level` exclamation marks; 0 removes the marker.
    pub fn set_priority(lines: &[String], level: usize) -> Vec<String> {
        set_priority_marker(lines, &"!".repeat(level))
    }

    /// Adds a `!` on the side the exclamation run sits on.
    pub fn increase_priority(lines: &[String]) -> Vec<String> {
        let marker = match current_marker(head(lines)).map(|(_, run)| run) {
            Some(m) if m.starts_with('!') => format!("!{m}"),
            Some(m) => format!("{m}!"),
            None => "!".to_string(),
        };
        set_priority_marker(lines, &marker)
    }

    /// Removes one `!`; no-op at priority 0.
    pub fn decrease_priority(lines: &[String]) -> Vec<String> {
        let Some((_, marker)) = current_marker(head(lines)).filter(|(_, m)| m.contains('!'))
        else {
            return lines.to_vec();
        };
        let marker = if marker.starts_with('!') {
            &marker[1..]
        } else {
            &marker[..marker.len() - 1]
        };
        set_priority_marker(lines, marker)
    }

    /// Move the due date by `delta` units of its own granularity. Tasks without a
    /// date are returned unchanged.
    pub fn shift_due_date(lines: &[String], delta: i32) -> Vec<String> {
        let Some((row, found)) = extract::due_date(lines) else {
            return lines.to_vec();
        };
        let shifted = dates::shift_date(&found.token, delta);
        tracing::trace!(from = %found.token, to = %shifted, "shift due date");
        let mut out = lines.to_vec();
        out[row].replace_range(found.start..found.end, &shifted.to_string());
        out
    }

    pub fn increase_date(lines: &[String]) -> Vec<String> {
        shift_due_date(lines, 1)
    }

    pub fn decrease_date(lines: &[String]) -> Vec<String> {
        shift_due_date(lines, -1)
    }

}

pub mod sort {
    //! Task ordering within a group: due date ascending (undated last), then
    //! priority descending, otherwise original order.

    use crate::core::{Group, Task};
    use std::cmp::Ordering;

    pub fn compare_tasks(a: &Task, b: &Task) -> Ordering {
        let due = |task: &Task| {
            let due = task.due_date();
            (due.is_none(), due)
        };
        due(a)
            .cmp(&due(b))
            .then_with(|| b.priority().cmp(&a.priority()))
    }

    pub fn sort_group(group: &mut Group) {
        // `sort_by` is stable.
        group.tasks.sort_by(compare_tasks);
    }

    pub fn sort_document(groups: &mut [Group]) {
        groups.iter_mut().for_each(sort_group);
    }

}

pub mod lint {
    //! Document linter: a state machine over classified lines that reports
    //! structural and semantic problems with character-accurate ranges. It runs on
    //! the raw lines and never consults the parsed groups.

    use crate::classify::{ClassifyContext, classify};
    use crate::core::{LineKind, Malformed};
    use crate::dates;
    use crate::grammar;
    use serde::Serialize;
    use std::fmt;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    #[serde(rename_all = "snake_case")]
    pub enum LintKind {
        BracketWithoutTask,
        InvalidCheckbox,
        CheckboxSpacing,
        InvalidPriority,
        InvalidDate,
        UnexpectedIndent,
        WrongIndentation,
        MissingSeparator,
        MultipleTitles,
        InvalidTitleStart,
        BlankAfterTitle,
        MissingTrailingNewline,
    }

    impl LintKind {
        pub fn message(self) -> &'static str {
            match self {
                LintKind::BracketWithoutTask => "only tasks should start with an opening bracket",
                LintKind::InvalidCheckbox => "invalid checkbox",
                LintKind::CheckboxSpacing => "checkbox must be followed by exactly one space",
                LintKind::InvalidPriority => "invalid priority",
                LintKind::InvalidDate => "invalid date",
                LintKind::UnexpectedIndent => "only multiline tasks should be indented",
                LintKind::WrongIndentation => "wrong indentation",
                LintKind::MissingSeparator => {
                    "title should be separated from a preceding item by a blank line"
                }
                LintKind::MultipleTitles => "a group can have only one title",
                LintKind::InvalidTitleStart => "title must not start with blank or bracket",
                LintKind::BlankAfterTitle => {
                    "no blank lines are supposed to be between title and the respective tasks"
                }
                LintKind::MissingTrailingNewline => "missing trailing newline",
            }
        }
    }

    impl fmt::Display for LintKind {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.message())
        }
    }

    /// 0-based line and character column.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
    pub struct Position {
        pub line: usize,
        pub col: usize,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    pub struct TextRange {
        pub start: Position,
        pub end: Position,
    }

    impl TextRange {
        pub fn on_line(line: usize, start_col: usize, end_col: usize) -> Self {
            Self {
                start: Position {
                    line,
                    col: start_col,
                },
                end: Position { line, col: end_col },
            }
        }
    }

    /// Every diagnostic is a warning; nothing the linter finds stops a parse.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct Diagnostic {
        pub kind: LintKind,
        pub message: String,
        pub range: TextRange,
    }

    impl fmt::Display for Diagnostic {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let start = self.range.start;
            write!(f, "{}:{}: {}", start.line + 1, start.col + 1, self.message)
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum ParsingState {
        Start,
        BlankLine,
        Title,
        TaskHead,
        TaskBody,
        Invalid,
    }

    struct Scan {
        state: ParsingState,
        /// A due date was already seen in the current task.
        have_date: bool,
        /// Blank lines (row, width) seen right after a title, flagged only if a task follows.
        title_gap: Option<Vec<(usize, usize)>>,
        out: Vec<Diagnostic>,
    }

    impl Scan {
        fn new() -> Self {
            Self {
                state: ParsingState::Start,
                have_date: false,
                title_gap: None,
                out: Vec::new(),
            }
        }

        fn track_title_gap(&mut self, row: usize, line: &str, kind: LineKind) {
            if kind == LineKind::Blank {
                if self.state == ParsingState::Title {
                    self.title_gap = Some(Vec::new());
                }
                if let Some(gap) = self.title_gap.as_mut() {
                    gap.push((row, line.chars().count()));
                }
                return;
            }
            let Some(gap) = self.title_gap.take() else {
                return;
            };
            let opens_task = match kind {
                LineKind::TaskHead => true,
                LineKind::Malformed(reason) => reason.is_checkbox_issue(),
                _ => false,
            };
            if opens_task {
                for (blank, width) in gap {
                    self.push(LintKind::BlankAfterTitle, TextRange::on_line(blank, 0, width));
                }
            }
        }

        fn push(&mut self, kind: LintKind, range: TextRange) {
            self.out.push(Diagnostic {
                kind,
                message: kind.message().to_string(),
                range,
            });
        }

        fn push_line(&mut self, kind: LintKind, row: usize, line: &str) {
            self.push(kind, TextRange::on_line(row, 0, line.chars().count()));
        }

        fn line(&mut self, row: usize, line: &str, kind: LineKind) {
            use ParsingState as S;
            self.track_title_gap(row, line, kind);
            self.state = match kind {
                LineKind::Blank => {
                    self.have_date = false;
                    S::BlankLine
                }
                LineKind::TaskHead | LineKind::Malformed(Malformed::MissingSpace) => {
                    self.open_task(row, line);
                    S::TaskHead
                }
                LineKind::Malformed(Malformed::InvalidStatus) => {
                    let end = grammar::bracket_region(line);
                    self.push(LintKind::InvalidCheckbox, TextRange::on_line(row, 0, end));
                    self.open_task(row, line);
                    S::TaskHead
                }
                LineKind::Malformed(Malformed::NoClosingBracket) => {
                    let end = grammar::bracket_region(line);
                    self.push(LintKind::BracketWithoutTask, TextRange::on_line(row, 0, end));
                    self.have_date = false;
                    self.check_date(row, line);
                    S::Invalid
                }
                LineKind::Continuation => {
                    let indent = grammar::indentation(line);
                    if indent > grammar::INDENT_WIDTH {
                        self.push(LintKind::WrongIndentation, TextRange::on_line(row, 0, indent));
                    }
                    self.check_date(row, line);
                    if self.state == S::Invalid { S::Invalid } else { S::TaskBody }
                }
                LineKind::Malformed(Malformed::UnexpectedIndent) => {
                    self.push_line(LintKind::UnexpectedIndent, row, line);
                    if !matches!(self.state, S::Start | S::BlankLine) {
                        self.push_line(LintKind::MissingSeparator, row, line);
                    }
                    S::Title
                }
                LineKind::Title => {
                    if matches!(self.state, S::TaskHead | S::TaskBody | S::Invalid) {
                        self.push_line(LintKind::MissingSeparator, row, line);
                    }
                    self.check_title_start(row, line);
                    S::Title
                }
                LineKind::Malformed(Malformed::MultipleTitles) => {
                    self.push_line(LintKind::MultipleTitles, row, line);
                    self.check_title_start(row, line);
                    S::Title
                }
            };
        }

        fn open_task(&mut self, row: usize, line: &str) {
            self.have_date = false;
            if let Some((_, rest)) = grammar::checkbox(line) {
                if !rest.is_empty() && (!rest.starts_with(' ') || rest.starts_with("  ")) {
                    self.push(LintKind::CheckboxSpacing, TextRange::on_line(row, 3, 4));
                }
            }
            if let Some((start, run)) = grammar::priority_run(line) {
                if !grammar::is_priority_shape(run) {
                    let range = TextRange::on_line(row, start, start + run.len());
                    self.push(LintKind::InvalidPriority, range);
                }
            }
            self.check_date(row, line);
        }

        /// Only the first date of a task is validated; it is the one that resolves.
        fn check_date(&mut self, row: usize, line: &str) {
            if self.have_date {
                return;
            }
            let Some(found) = grammar::find_date(line) else {
                return;
            };
            self.have_date = true;
            if dates::check_date(&found.token).is_err() {
                let range = TextRange::on_line(
                    row,
                    grammar::col(line, found.start),
                    grammar::col(line, found.end),
                );
                self.push(LintKind::InvalidDate, range);
            }
        }

        fn check_title_start(&mut self, row: usize, line: &str) {
            if grammar::is_wrong_title_start(line) {
                self.push_line(LintKind::InvalidTitleStart, row, line);
            }
        }
    }

    /// Diagnostics in line order. A document ending in a newline has a final empty
    /// line (see `parser::split_lines`).
    pub fn lint_document<S: AsRef<str>>(lines: &[S]) -> Vec<Diagnostic> {
        let mut scan = Scan::new();
        let mut ctx = ClassifyContext::default();
        for (row, line) in lines.iter().enumerate() {
            let line = line.as_ref();
            let kind = classify(line, &ctx);
            ctx.advance(kind);
            scan.line(row, line, kind);
        }
        if let Some(last) = lines.last() {
            if scan.state != ParsingState::BlankLine {
                let row = lines.len() - 1;
                let end = last.as_ref().chars().count();
                scan.push(
                    LintKind::MissingTrailingNewline,
                    TextRange::on_line(row, end, end),
                );
            }
        }
        tracing::debug!(lines = lines.len(), diagnostics = scan.out.len(), "linted document");
        scan.out
    }

    pub fn lint_text(text: &str) -> Vec<Diagnostic> {
        lint_document(&crate::parser::split_lines(text))
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn kinds(text: &str) -> Vec<LintKind> {
            lint_text(text).into_iter().map(|d| d.kind).collect()
        }

        #[test]
        fn clean_document_has_no_diagnostics() {
            let text = "Groceries\n[ ] Bread\n    wholegrain -> 2022-05\n[x] !! Milk #dairy\n\n[@] Call\n";
            assert!(lint_text(text).is_empty(), "{:?}", lint_text(text));
        }

        #[test]
        fn missing_trailing_newline_only() {
            let diags = lint_text("[ ] A\n[x] B");
            assert_eq!(diags.len(), 1);
            assert_eq!(diags[0].kind, LintKind::MissingTrailingNewline);
            assert_eq!(diags[0].message, "missing trailing newline");
            assert_eq!(diags[0].range, TextRange::on_line(1, 5, 5));
        }

        #[test]
        fn invalid_checkbox_spans_the_brackets() {
            let diags = lint_text("[e] text\n");
            assert_eq!(diags.len(), 1);
            assert_eq!(diags[0].kind, LintKind::InvalidCheckbox);
            assert_eq!(diags[0].range, TextRange::on_line(0, 0, 3));
        }

        #[test]
        fn bracket_without_task() {
            let diags = lint_text("[  ] wide\n");
            assert_eq!(diags[0].kind, LintKind::BracketWithoutTask);
            assert_eq!(diags[0].range, TextRange::on_line(0, 0, 4));
        }

        #[test]
        fn checkbox_spacing_points_after_the_bracket() {
            for text in ["[ ]text\n", "[ ]  two spaces\n"] {
                let diags = lint_text(text);
                assert_eq!(diags.len(), 1, "{text:?}");
                assert_eq!(diags[0].kind, LintKind::CheckboxSpacing);
                assert_eq!(diags[0].range, TextRange::on_line(0, 3, 4));
            }
        }

        #[test]
        fn invalid_date_range_covers_the_token() {
            let diags = lint_text("[ ] a -> 2022-13-01\n");
            assert_eq!(diags.len(), 1);
            assert_eq!(diags[0].kind, LintKind::InvalidDate);
            assert_eq!(diags[0].range, TextRange::on_line(0, 9, 19));
        }

        #[test]
        fn only_the_first_date_is_checked() {
            assert!(kinds("[ ] a -> 2022-05\n    b -> 2022-13\n").is_empty());
            assert_eq!(kinds("[ ] a\n    b -> 2022-W54\n"), [LintKind::InvalidDate]);
        }

        #[test]
        fn malformed_priority() {
            let diags = lint_text("[ ] .!. foo\n");
            assert_eq!(diags.len(), 1);
            assert_eq!(diags[0].kind, LintKind::InvalidPriority);
            assert_eq!(diags[0].range, TextRange::on_line(0, 4, 7));
        }

        #[test]
        fn indentation_problems() {
            assert_eq!(
                kinds("    stray\n"),
                [LintKind::UnexpectedIndent]
            );
            assert_eq!(
                kinds("Title\n    stray\n"),
                [LintKind::UnexpectedIndent, LintKind::MissingSeparator]
            );
            let diags = lint_text("[ ] a\n      deep\n");
            assert_eq!(diags.len(), 1);
            assert_eq!(diags[0].kind, LintKind::WrongIndentation);
            assert_eq!(diags[0].range, TextRange::on_line(1, 0, 6));
        }

        #[test]
        fn title_placement() {
            assert_eq!(kinds("[ ] a\nTitle\n"), [LintKind::MissingSeparator]);
            assert_eq!(kinds("One\nTwo\n"), [LintKind::MultipleTitles]);
            assert_eq!(
                kinds("  Title\n"),
                [LintKind::InvalidTitleStart]
            );
        }

        #[test]
        fn blank_between_title_and_tasks() {
            let diags = lint_text("Title\n\n[ ] a\n");
            assert_eq!(diags.len(), 1);
            assert_eq!(diags[0].kind, LintKind::BlankAfterTitle);
            assert_eq!(diags[0].range, TextRange::on_line(1, 0, 0));

            let diags = lint_text("Title\n  \n\n[e] a\n");
            let blanks: Vec<TextRange> = diags
                .iter()
                .filter(|d| d.kind == LintKind::BlankAfterTitle)
                .map(|d| d.range)
                .collect();
            assert_eq!(blanks, [TextRange::on_line(1, 0, 2), TextRange::on_line(2, 0, 0)]);
        }

        #[test]
        fn blank_after_title_without_tasks_is_fine() {
            assert!(kinds("Title\n\nOther\n[ ] a\n").is_empty());
            assert!(kinds("Title\n").is_empty());
            assert!(kinds("[ ] a\n\n[ ] b\n").is_empty());
        }

        #[test]
        fn empty_document_is_clean() {
            assert!(lint_text("").is_empty());
            assert!(lint_document::<&str>(&[]).is_empty());
        }

        #[test]
        fn diagnostic_display_is_one_based() {
            let diags = lint_text("[e] text\n");
            assert_eq!(diags[0].to_string(), "1:1: invalid checkbox");
        }
    }
}

pub mod format {
    //! Writing an edited model back onto the source lines.

    use crate::core::{Group, LineRange, Task, XitError};

    /// Re-emit `lines` with each group's task region replaced by its current tasks.
    /// Titles, blank lines and stray lines are kept verbatim.
    pub fn render(lines: &[String], groups: &[Group]) -> Vec<String> {
        let mut regions: Vec<(LineRange, &Group)> = groups
            .iter()
            .filter_map(|group| group.task_region.map(|region| (region, group)))
            .collect();
        regions.sort_by_key(|(region, _)| region.start);

        let mut out = Vec::with_capacity(lines.len());
        let mut row = 0;
        for (region, group) in regions {
            if region.start < row || region.end >= lines.len() {
                continue;
            }
            out.extend_from_slice(&lines[row..region.start]);
            for task in &group.tasks {
                out.extend(task.lines.iter().cloned());
            }
            row = region.end + 1;
        }
        out.extend_from_slice(&lines[row.min(lines.len())..]);
        out
    }

    pub fn render_text(lines: &[String]) -> String {
        lines.join("\n")
    }

    /// Replace `task`'s span in `lines` with `new_lines`, which must have the same
    /// number of lines.
    pub fn splice_task(
        lines: &[String],
        task: &Task,
        new_lines: &[String],
    ) -> Result<Vec<String>, XitError> {
        let range = task.range;
        if range.end >= lines.len() {
            return Err(XitError::LineOutOfRange {
                line: range.end,
                line_count: lines.len(),
            });
        }
        if new_lines.len() != range.line_count() {
            return Err(XitError::TaskShapeMismatch {
                start: range.start,
                expected: range.line_count(),
                found: new_lines.len(),
            });
        }
        let mut out = lines.to_vec();
        out.splice(range.start..=range.end, new_lines.iter().cloned());
        Ok(out)
    }

}

pub mod agenda {
    //! Read-model projection of open work by due date, relative to a given day.

    use crate::core::{DateToken, Group, Status};
    use chrono::NaiveDate;
    use serde::Serialize;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
    #[serde(rename_all = "lowercase")]
    pub enum DueState {
        Overdue,
        Today,
        Tomorrow,
        Later,
    }

    impl DueState {
        pub fn of(due: NaiveDate, today: NaiveDate) -> Self {
            if due < today {
                DueState::Overdue
            } else if due == today {
                DueState::Today
            } else if today.succ_opt() == Some(due) {
                DueState::Tomorrow
            } else {
                DueState::Later
            }
        }

        pub fn label(self) -> &'static str {
            match self {
                DueState::Overdue => "Overdue",
                DueState::Today => "Today",
                DueState::Tomorrow => "Tomorrow",
                DueState::Later => "Later",
            }
        }
    }

    /// Denormalized slice of one task, for agenda lists.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct AgendaItem {
        /// Head line, 0-based.
        pub line: usize,
        pub group: Option<String>,
        pub status: Status,
        pub priority: usize,
        pub token: DateToken,
        pub due: NaiveDate,
        pub state: DueState,
        pub description: Option<String>,
        pub tags: Vec<String>,
    }

    #[derive(Debug, Clone, Copy, Default)]
    pub struct ProjectOptions {
        /// Drop items due after tomorrow.
        pub due_soon_only: bool,
    }

    pub fn project(groups: &[Group], today: NaiveDate) -> Vec<AgendaItem> {
        project_with_options(groups, today, ProjectOptions::default())
    }

    /// Open and ongoing tasks with a resolvable due date, earliest first, higher
    /// priority first on the same day.
    pub fn project_with_options(
        groups: &[Group],
        today: NaiveDate,
        opts: ProjectOptions,
    ) -> Vec<AgendaItem> {
        let mut out = Vec::new();
        for group in groups {
            for task in &group.tasks {
                if !task.status().is_active() {
                    continue;
                }
                let (Some(token), Some(due)) = (task.due_date_token(), task.due_date()) else {
                    continue;
                };
                let state = DueState::of(due, today);
                if opts.due_soon_only && state == DueState::Later {
                    continue;
                }
                out.push(AgendaItem {
                    line: task.range.start,
                    group: group.title_text().map(str::to_string),
                    status: task.status(),
                    priority: task.priority(),
                    token,
                    due,
                    state,
                    description: task.description().map(str::to_string),
                    tags: task.tags().into_iter().map(|tag| tag.name).collect(),
                });
            }
        }
        out.sort_by(|a, b| a.due.cmp(&b.due).then_with(|| b.priority.cmp(&a.priority)));
        out
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::parser::parse_text;

        fn day(y: i32, m: u32, d: u32) -> NaiveDate {
            NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
        }

        #[test]
        fn due_states() {
            let today = day(2022, 5, 3);
            assert_eq!(DueState::of(day(2022, 5, 2), today), DueState::Overdue);
            assert_eq!(DueState::of(today, today), DueState::Today);
            assert_eq!(DueState::of(day(2022, 5, 4), today), DueState::Tomorrow);
            assert_eq!(DueState::of(day(2022, 6, 1), today), DueState::Later);
        }

        #[test]
        fn projects_active_dated_tasks() {
            let doc = parse_text(
                "Home\n[ ] later -> 2022-12\n[@] ! now -> 2022-05-03 #urgent\n[x] done -> 2022-01-01\n[ ] undated\n[ ] bad -> 2022-02-30\n\n[ ] old -> 2022-W01\n",
            );
            let items = project(&doc.groups, day(2022, 5, 3));
            let lines: Vec<usize> = items.iter().map(|item| item.line).collect();
            assert_eq!(lines, [7, 2, 1]);
            assert_eq!(items[0].state, DueState::Overdue);
            assert_eq!(items[0].group, None);
            assert_eq!(items[1].state, DueState::Today);
            assert_eq!(items[1].group.as_deref(), Some("Home"));
            assert_eq!(items[1].description.as_deref(), Some("now -> 2022-05-03 #urgent"));
            assert_eq!(items[1].tags, ["urgent"]);
            assert_eq!(items[2].token.normalized(), "2022-12");

            let soon = project_with_options(
                &doc.groups,
                day(2022, 5, 3),
                ProjectOptions { due_soon_only: true },
            );
            assert_eq!(soon.len(), 2);
        }
    }
}

pub mod storage {
    //! File boundary: the only module that touches the filesystem.

    use crate::parser::{ParsedDocument, parse_document, split_lines};
    use anyhow::{Context, Result};
    use std::{
        fs,
        path::{Path, PathBuf},
    };

    /// A loaded `.xit` file: its lines plus the parse of those lines.
    #[derive(Debug, Clone)]
    pub struct XitFile {
        pub path: Option<PathBuf>,
        pub lines: Vec<String>,
        pub document: ParsedDocument,
    }

    impl XitFile {
        pub fn from_text(path: Option<PathBuf>, text: &str) -> Self {
            let lines = split_lines(text);
            let document = parse_document(&lines);
            Self {
                path,
                lines,
                document,
            }
        }

        pub fn text(&self) -> String {
            self.lines.join("\n")
        }
    }

    /// Parsing stays independent of where the text comes from.
    pub trait XitLoader {
        fn load_file(&self, abs_path: &Path) -> Result<XitFile>;
    }

    /// Reads files from the local filesystem.
    pub struct FsLoader;

    impl XitLoader for FsLoader {
        fn load_file(&self, abs_path: &Path) -> Result<XitFile> {
            let text =
                fs::read_to_string(abs_path).with_context(|| format!("reading {:?}", abs_path))?;
            tracing::debug!(path = %abs_path.display(), bytes = text.len(), "loaded file");
            Ok(XitFile::from_text(Some(abs_path.to_path_buf()), &text))
        }
    }

}
