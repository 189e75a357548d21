//! Outline library for org-style headlines.
//! Lines are recognised cheaply, stack-built into a tree by level, and each headline
//! is decomposed lazily the first time one of its fields is read.

pub mod core {
    use indexmap::IndexSet;
    use serde::{Deserialize, Serialize};

    /* ------------------------------ Constants ------------------------------ */

    /// Repeated leading character whose count encodes nesting depth.
    pub const MARKER: char = '*';

    /// Column at which a right-aligned tag group ends.
    pub const TAG_COLUMN: usize = 77;

    pub const DEFAULT_KEYWORDS: [&str; 2] = ["TODO", "DONE"];

    /* ------------------------------- IDs ------------------------------- */

    /// Arena index of a node inside its `Document`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct NodeId(pub(crate) usize);

    impl NodeId {
        pub fn index(self) -> usize {
            self.0
        }
    }

    /* ----------------------------- Configuration ----------------------------- */

    /// Recognised status keywords, in declaration order.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct Keywords(IndexSet<String>);

    impl Keywords {
        /// Build a vocabulary. Keywords are matched against whitespace-delimited
        /// tokens, so empty keywords and keywords containing whitespace are rejected.
        pub fn new<I, S>(keywords: I) -> Result<Self, OutlineError>
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            let mut set = IndexSet::new();
            for keyword in keywords {
                let keyword = keyword.into();
                if keyword.is_empty() {
                    return Err(OutlineError::EmptyKeyword);
                }
                if keyword.chars().any(char::is_whitespace) {
                    return Err(OutlineError::KeywordWhitespace(keyword));
                }
                set.insert(keyword);
            }
            Ok(Self(set))
        }

        pub fn contains(&self, token: &str) -> bool {
            self.0.contains(token)
        }

        pub fn iter(&self) -> impl Iterator<Item = &str> {
            self.0.iter().map(String::as_str)
        }

        pub fn len(&self) -> usize {
            self.0.len()
        }

        pub fn is_empty(&self) -> bool {
            self.0.is_empty()
        }
    }

    impl Default for Keywords {
        fn default() -> Self {
            Self(DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect())
        }
    }

    /// Settings threaded into a parse.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ParseOptions {
        /// Status keywords recognised as the first headline token.
        #[serde(default)]
        pub keywords: Keywords,
    }

    /// Settings used when rendering headlines back to text.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct FormatOptions {
        /// Display column at which the tag group ends.
        pub tag_column: usize,
    }

    impl Default for FormatOptions {
        fn default() -> Self {
            Self {
                tag_column: TAG_COLUMN,
            }
        }
    }

    /* ---------------------------- Value Objects ---------------------------- */

    /// Structured fields of one headline.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Headline {
        /// Status keyword drawn from the document vocabulary.
        pub keyword: Option<String>,
        /// Single character from a `[#X]` cookie.
        pub priority: Option<char>,
        pub title: String,
        /// Tags in declaration order.
        #[serde(default)]
        pub tags: Vec<String>,
    }

    /// Owned, nested view of a headline and its subtree (e.g. for JSON output).
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct HeadlineSnapshot {
        pub level: usize,
        #[serde(flatten)]
        pub headline: Headline,
        #[serde(default)]
        pub children: Vec<HeadlineSnapshot>,
    }

    /* ---------------------------- Errors (domain) ---------------------------- */

    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    pub enum OutlineError {
        #[error("keyword must not be empty")]
        EmptyKeyword,
        #[error("keyword {0:?} contains whitespace")]
        KeywordWhitespace(String),
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn default_keywords_are_todo_and_done() {
            let keywords = Keywords::default();
            assert!(keywords.contains("TODO"));
            assert!(keywords.contains("DONE"));
            assert!(!keywords.contains("NEXT"));
            assert_eq!(keywords.iter().collect::<Vec<_>>(), ["TODO", "DONE"]);
        }

        #[test]
        fn keywords_reject_unmatchable_entries() {
            assert_eq!(Keywords::new([""]), Err(OutlineError::EmptyKeyword));
            assert_eq!(
                Keywords::new(["IN PROGRESS"]),
                Err(OutlineError::KeywordWhitespace("IN PROGRESS".into()))
            );
        }

        #[test]
        fn keywords_deduplicate_and_keep_order() {
            let keywords = Keywords::new(["NEXT", "TODO", "NEXT"]).expect("keywords");
            assert_eq!(keywords.len(), 2);
            assert_eq!(keywords.iter().collect::<Vec<_>>(), ["NEXT", "TODO"]);
        }

        #[test]
        fn parse_options_deserialize_with_defaults() {
            let opts: ParseOptions = serde_json::from_str("{}").expect("json");
            assert_eq!(opts, ParseOptions::default());

            let opts: ParseOptions =
                serde_json::from_str(r#"{"keywords":["WAIT"]}"#).expect("json");
            assert!(opts.keywords.contains("WAIT"));
            assert!(!opts.keywords.contains("TODO"));
        }
    }
}

pub mod grammar {
    //! Headline grammar built on `nom`.
    //!
    //! Recognition is cheap and happens for every line; decomposition runs at most
    //! once per node (unless forced) and proceeds keyword, priority, tags, title,
    //! since each step strips what the next one looks at.

    use crate::core::{Headline, Keywords, MARKER};
    use nom::{
        IResult,
        bytes::complete::{tag, take_till1, take_while, take_while1},
        character::complete::{char, none_of},
        combinator::all_consuming,
        multi::many1,
        sequence::{delimited, preceded, terminated},
    };

    type PResult<'a, T> = IResult<&'a str, T>;

    /// A line recognised as a headline, before decomposition.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HeadlineLine<'a> {
        /// 0-based depth: marker count minus one.
        pub level: usize,
        /// Everything after the markers and the separating whitespace.
        pub content: &'a str,
    }

    /// Recognise `*+\s+.*`. Returns `None` for anything else.
    pub fn recognize_headline(line: &str) -> Option<HeadlineLine<'_>> {
        let (rest, markers) = marker_run(line).ok()?;
        let (content, _) = separator(rest).ok()?;
        Some(HeadlineLine {
            level: markers.len() - 1,
            content,
        })
    }

    /// Split headline content into keyword, priority, title and tags.
    pub fn decompose(content: &str, keywords: &Keywords) -> Headline {
        let mut rest = content.trim();

        let mut keyword = None;
        if let Ok((after, token)) = first_token(rest) {
            if keywords.contains(token) {
                keyword = Some(token.to_string());
                rest = after.trim_start();
            }
        }

        let mut priority = None;
        if let Ok((after, token)) = first_token(rest) {
            if let Ok((_, p)) = priority_cookie(token) {
                priority = Some(p);
                rest = after.trim_start();
            }
        }

        let mut tags = Vec::new();
        if let Some((head, group)) = split_tag_group(rest) {
            tags = group;
            rest = head;
        }

        Headline {
            keyword,
            priority,
            title: rest.trim().to_string(),
            tags,
        }
    }

    pub fn is_tag_char(c: char) -> bool {
        c.is_alphanumeric() || matches!(c, '_' | '%' | '#' | '@')
    }

    fn marker_run(i: &str) -> PResult<'_, &str> {
        take_while1(|c: char| c == MARKER)(i)
    }

    fn separator(i: &str) -> PResult<'_, &str> {
        take_while1(char::is_whitespace)(i)
    }

    fn first_token(i: &str) -> PResult<'_, &str> {
        take_till1(char::is_whitespace)(i)
    }

    /// Exactly `[#X]` where X is not `]`.
    fn priority_cookie(i: &str) -> PResult<'_, char> {
        all_consuming(delimited(tag("[#"), none_of("]"), char(']')))(i)
    }

    /// `:t1:t2:...:` with nothing after it. Pieces may be empty (`::`).
    fn tag_group(i: &str) -> PResult<'_, Vec<&str>> {
        all_consuming(preceded(
            char(':'),
            many1(terminated(take_while(is_tag_char), char(':'))),
        ))(i)
    }

    /// Find a trailing tag group preceded by whitespace (or the start of `content`).
    /// Returns the content before it, right-trimmed, and the non-empty tags.
    fn split_tag_group(content: &str) -> Option<(&str, Vec<String>)> {
        let start = content
            .char_indices()
            .rev()
            .find(|(_, c)| c.is_whitespace())
            .map(|(pos, c)| pos + c.len_utf8())
            .unwrap_or(0);

        let (_, pieces) = tag_group(&content[start..]).ok()?;
        let tags: Vec<String> = pieces
            .into_iter()
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        if tags.is_empty() {
            return None;
        }
        Some((content[..start].trim_end(), tags))
    }

}

pub mod tree {
    //! Arena-backed outline tree.
    //!
    //! The `Document` owns every node; parent/child links are `NodeId`s. Reading goes
    //! through `NodeRef`, a copyable handle that borrows the document and parses its
    //! headline on first access.

    use crate::core::{FormatOptions, Headline, HeadlineSnapshot, Keywords, NodeId, ParseOptions};
    use crate::format;
    use crate::grammar;
    use once_cell::sync::OnceCell;
    use std::fmt;
    use std::iter::FusedIterator;

    /* ------------------------------ Entities ------------------------------ */

    #[derive(Debug, Clone)]
    pub(crate) struct Node {
        level: usize,
        raw: String,
        headline: OnceCell<Headline>,
        parent: Option<NodeId>,
        children: Vec<NodeId>,
    }

    /// Whether a node has been decomposed yet.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ParseState<'a> {
        Unparsed(&'a str),
        Parsed(&'a Headline),
    }

    /* ------------------------------ Aggregate ------------------------------ */

    /// Aggregate root: the top-level headlines of one text plus its parse settings.
    #[derive(Debug, Clone, Default)]
    pub struct Document {
        options: ParseOptions,
        nodes: Vec<Node>,
        roots: Vec<NodeId>,
    }

    impl Document {
        pub fn new(options: ParseOptions) -> Self {
            Self {
                options,
                nodes: Vec::new(),
                roots: Vec::new(),
            }
        }

        pub fn options(&self) -> &ParseOptions {
            &self.options
        }

        pub fn keywords(&self) -> &Keywords {
            &self.options.keywords
        }

        /// Replace the keyword vocabulary. Every cached decomposition is dropped so
        /// the next field access sees the new keywords.
        pub fn set_keywords(&mut self, keywords: Keywords) {
            self.options.keywords = keywords;
            for node in &mut self.nodes {
                node.headline.take();
            }
        }

        /// Total number of nodes at any depth.
        pub fn len(&self) -> usize {
            self.nodes.len()
        }

        pub fn is_empty(&self) -> bool {
            self.nodes.is_empty()
        }

        pub fn get(&self, id: NodeId) -> Option<NodeRef<'_>> {
            (id.0 < self.nodes.len()).then_some(NodeRef { doc: self, id })
        }

        /// Top-level nodes in source order.
        pub fn roots(&self) -> impl ExactSizeIterator<Item = NodeRef<'_>> {
            self.roots.iter().map(move |&id| NodeRef { doc: self, id })
        }

        /// Depth-first pre-order walk over every top-level subtree.
        pub fn iter(&self) -> Iter<'_> {
            Iter {
                doc: self,
                stack: self.roots.iter().rev().copied().collect(),
            }
        }

        /// Discard the cached fields of `id` and decompose its raw content again.
        pub fn reparse(&mut self, id: NodeId) -> Option<&Headline> {
            let Document { options, nodes, .. } = self;
            let node = nodes.get_mut(id.0)?;
            node.headline.take();
            Some(
                node.headline
                    .get_or_init(|| grammar::decompose(&node.raw, &options.keywords)),
            )
        }

        pub fn to_text(&self) -> String {
            format::render_document(self, &FormatOptions::default())
        }

        pub fn to_text_with(&self, options: &FormatOptions) -> String {
            format::render_document(self, options)
        }

        pub fn snapshot(&self) -> Vec<HeadlineSnapshot> {
            self.roots().map(NodeRef::snapshot).collect()
        }

        /// Add a node under `parent` (or at top level) and link both directions.
        pub(crate) fn push_node(
            &mut self,
            parent: Option<NodeId>,
            level: usize,
            raw: &str,
        ) -> NodeId {
            let id = NodeId(self.nodes.len());
            self.nodes.push(Node {
                level,
                raw: raw.to_string(),
                headline: OnceCell::new(),
                parent,
                children: Vec::new(),
            });
            match parent {
                Some(p) => self.nodes[p.0].children.push(id),
                None => self.roots.push(id),
            }
            id
        }
    }

    impl fmt::Display for Document {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.to_text())
        }
    }

    impl<'a> IntoIterator for &'a Document {
        type Item = NodeRef<'a>;
        type IntoIter = Iter<'a>;

        fn into_iter(self) -> Self::IntoIter {
            self.iter()
        }
    }

    /* ------------------------------- Handles ------------------------------- */

    /// Borrowed view of one node.
    #[derive(Clone, Copy)]
    pub struct NodeRef<'a> {
        doc: &'a Document,
        id: NodeId,
    }

    impl<'a> NodeRef<'a> {
        fn node(self) -> &'a Node {
            &self.doc.nodes[self.id.0]
        }

        pub fn id(self) -> NodeId {
            self.id
        }

        pub fn document(self) -> &'a Document {
            self.doc
        }

        /// 0-based depth. Never parses.
        pub fn level(self) -> usize {
            self.node().level
        }

        /// Line content after the markers, as read.
        pub fn raw(self) -> &'a str {
            &self.node().raw
        }

        pub fn is_parsed(self) -> bool {
            self.node().headline.get().is_some()
        }

        pub fn state(self) -> ParseState<'a> {
            let node = self.node();
            match node.headline.get() {
                Some(h) => ParseState::Parsed(h),
                None => ParseState::Unparsed(&node.raw),
            }
        }

        /// Decomposed fields; parses on first call.
        pub fn headline(self) -> &'a Headline {
            let node = self.node();
            node.headline
                .get_or_init(|| grammar::decompose(&node.raw, self.doc.keywords()))
        }

        pub fn keyword(self) -> Option<&'a str> {
            self.headline().keyword.as_deref()
        }

        pub fn priority(self) -> Option<char> {
            self.headline().priority
        }

        pub fn title(self) -> &'a str {
            &self.headline().title
        }

        pub fn tags(self) -> &'a [String] {
            &self.headline().tags
        }

        pub fn parent(self) -> Option<NodeRef<'a>> {
            self.node().parent.map(|id| NodeRef { doc: self.doc, id })
        }

        pub fn children(self) -> impl ExactSizeIterator<Item = NodeRef<'a>> {
            let doc = self.doc;
            self.node()
                .children
                .iter()
                .map(move |&id| NodeRef { doc, id })
        }

        /// Parent, grandparent, ... up to the top-level ancestor.
        pub fn ancestors(self) -> Ancestors<'a> {
            Ancestors {
                next: self.parent(),
            }
        }

        /// This node followed by its whole subtree, depth-first.
        pub fn iter(self) -> Iter<'a> {
            Iter {
                doc: self.doc,
                stack: vec![self.id],
            }
        }

        pub fn to_text(self) -> String {
            self.to_text_with(&FormatOptions::default())
        }

        pub fn to_text_with(self, options: &FormatOptions) -> String {
            format::render_headline(self.level(), self.headline(), options)
        }

        pub fn snapshot(self) -> HeadlineSnapshot {
            HeadlineSnapshot {
                level: self.level(),
                headline: self.headline().clone(),
                children: self.children().map(NodeRef::snapshot).collect(),
            }
        }
    }

    impl PartialEq for NodeRef<'_> {
        fn eq(&self, other: &Self) -> bool {
            std::ptr::eq(self.doc, other.doc) && self.id == other.id
        }
    }

    impl Eq for NodeRef<'_> {}

    impl fmt::Debug for NodeRef<'_> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("NodeRef")
                .field("id", &self.id)
                .field("level", &self.level())
                .field("state", &self.state())
                .finish()
        }
    }

    impl fmt::Display for NodeRef<'_> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.to_text())
        }
    }

    /* ------------------------------ Iterators ------------------------------ */

    /// Depth-first pre-order iterator. Each call to `iter()` starts afresh.
    #[derive(Debug, Clone)]
    pub struct Iter<'a> {
        doc: &'a Document,
        stack: Vec<NodeId>,
    }

    impl<'a> Iterator for Iter<'a> {
        type Item = NodeRef<'a>;

        fn next(&mut self) -> Option<Self::Item> {
            let id = self.stack.pop()?;
            let node = &self.doc.nodes[id.0];
            self.stack.extend(node.children.iter().rev().copied());
            Some(NodeRef { doc: self.doc, id })
        }
    }

    impl FusedIterator for Iter<'_> {}

    #[derive(Debug, Clone)]
    pub struct Ancestors<'a> {
        next: Option<NodeRef<'a>>,
    }

    impl<'a> Iterator for Ancestors<'a> {
        type Item = NodeRef<'a>;

        fn next(&mut self) -> Option<Self::Item> {
            let current = self.next?;
            self.next = current.parent();
            Some(current)
        }
    }

    impl FusedIterator for Ancestors<'_> {}

}

pub mod builder {
    //! Tree construction.
    //!
    //! `open` tracks the chain of ancestors that can still take children, indexed so
    //! that a node of depth `d` sits at `d + 1` (slot 0 is the document itself).
    //! Depths skipped by a forward jump are left `Vacant`; no nodes are invented.

    use crate::core::{NodeId, ParseOptions};
    use crate::grammar;
    use crate::tree::Document;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Slot {
        Root,
        Node(NodeId),
        Vacant,
    }

    /// Parse `text` with the default keyword vocabulary.
    pub fn parse(text: &str) -> Document {
        parse_with(text, ParseOptions::default())
    }

    /// Parse `text`. Never fails: non-headline lines are skipped and level jumps
    /// are normalised.
    pub fn parse_with(text: &str, options: ParseOptions) -> Document {
        let mut builder = TreeBuilder::new(options);
        for line in text.lines() {
            builder.push_line(line);
        }
        builder.finish()
    }

    /// Incremental builder fed one line at a time.
    #[derive(Debug, Clone)]
    pub struct TreeBuilder {
        doc: Document,
        open: Vec<Slot>,
    }

    impl TreeBuilder {
        pub fn new(options: ParseOptions) -> Self {
            Self {
                doc: Document::new(options),
                open: vec![Slot::Root],
            }
        }

        /// Attach the line if it is a headline; other lines are ignored.
        pub fn push_line(&mut self, line: &str) -> Option<NodeId> {
            let headline = grammar::recognize_headline(line)?;
            Some(self.push_headline(headline.level, headline.content))
        }

        /// Attach a headline of depth `level` with unparsed `content`. This is the
        /// public way to append a child: the parent is resolved from the open chain.
        pub fn push_headline(&mut self, level: usize, content: &str) -> NodeId {
            let parent = self.resolve_parent(level);
            let id = self.doc.push_node(parent, level, content);
            self.open.push(Slot::Node(id));
            id
        }

        pub fn finish(self) -> Document {
            self.doc
        }

        /// Close slots at or below `level`, then return the deepest remaining
        /// open node, or `None` when the new node is top-level.
        fn resolve_parent(&mut self, level: usize) -> Option<NodeId> {
            let mut target = level.min(self.open.len() - 1);
            self.open.truncate(target + 1);

            while target > 0 && self.open[target] == Slot::Vacant {
                target -= 1;
            }

            if self.open.len() <= level {
                self.open.resize(level + 1, Slot::Vacant);
            }

            match self.open[target] {
                Slot::Node(id) => Some(id),
                Slot::Root | Slot::Vacant => None,
            }
        }
    }

    impl Default for TreeBuilder {
        fn default() -> Self {
            Self::new(ParseOptions::default())
        }
    }

}

pub mod format {
    //! Canonical text rendering.

    use crate::builder;
    use crate::core::{FormatOptions, Headline, MARKER, ParseOptions};
    use crate::grammar;
    use crate::tree::Document;
    use unicode_width::UnicodeWidthStr;

    /// Render one headline of depth `level`. Present fields are joined by single
    /// spaces; tags are padded so the group ends at `options.tag_column`, with at
    /// least one space before it.
    pub fn render_headline(level: usize, headline: &Headline, options: &FormatOptions) -> String {
        let mut buf = String::new();
        buf.extend(std::iter::repeat_n(MARKER, level + 1));
        buf.push(' ');

        let mut fields: Vec<String> = Vec::with_capacity(3);
        if let Some(keyword) = &headline.keyword {
            fields.push(keyword.clone());
        }
        if let Some(priority) = headline.priority {
            fields.push(format!("[#{}]", priority));
        }
        if !headline.title.is_empty() {
            fields.push(headline.title.clone());
        }
        buf.push_str(&fields.join(" "));

        if !headline.tags.is_empty() {
            let group = format!(":{}:", headline.tags.join(":"));
            let used = buf.width() + group.width();
            let pad = options.tag_column.saturating_sub(used).max(1);
            buf.push_str(&" ".repeat(pad));
            buf.push_str(&group);
        }
        buf
    }

    /// Every node in iteration order, one per line, no trailing newline.
    pub fn render_document(doc: &Document, options: &FormatOptions) -> String {
        doc.iter()
            .map(|node| node.to_text_with(options))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Rewrite the headline lines of `source` in canonical form and pass every
    /// other line (body text, blank lines, line endings) through untouched.
    pub fn reformat_source(source: &str, parse: &ParseOptions, options: &FormatOptions) -> String {
        let doc = builder::parse_with(source, parse.clone());
        let mut headlines = doc.iter().map(|node| node.id());
        let mut out = String::with_capacity(source.len());

        for line in source.split_inclusive('\n') {
            let body = line.strip_suffix('\n').unwrap_or(line);
            let body = body.strip_suffix('\r').unwrap_or(body);
            if grammar::recognize_headline(body).is_none() {
                out.push_str(line);
                continue;
            }
            // Pre-order iteration visits nodes in source order.
            match headlines.next().and_then(|id| doc.get(id)) {
                Some(node) => {
                    out.push_str(&node.to_text_with(options));
                    out.push_str(&line[body.len()..]);
                }
                None => out.push_str(line),
            }
        }
        out
    }

}

pub use builder::{TreeBuilder, parse, parse_with};
pub use format::reformat_source;
pub use crate::core::{
    FormatOptions, Headline, Keywords, NodeId, OutlineError, ParseOptions, TAG_COLUMN,
};
pub use tree::{Document, NodeRef};
