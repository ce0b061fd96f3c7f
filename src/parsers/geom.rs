use pest::{iterators::Pair, Parser};
use pest_derive::Parser;

#[derive(Parser)]
#[grammar = "parsers/geom.pest"] // relative to src
pub struct GeomParser;

quick_error! {
    #[derive(Debug, PartialEq, Eq)]
    pub enum DocumentError {
        Syntax(msg: String) {
            display("malformed document: {}", msg)
        }
        MismatchedTag(open: String, close: String) {
            display("<{}> closed by </{}>", open, close)
        }
    }
}

/// One element of the document. Text of all text nodes directly under element is concatenated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Getters)]
#[get = "pub"]
pub struct Element {
    name:       String,
    attributes: Vec<(String, String)>,
    children:   Vec<Element>,
    text:       String,
}

impl Element {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|child| child.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |child| child.name == name)
    }

    /// Trimmed text of the first child with given name.
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|child| child.text.trim())
    }
}

/// Parse whole document and return its root element.
pub fn parse_document(input: &str) -> Result<Element, DocumentError> {
    let mut pairs = GeomParser::parse(Rule::document, input)
        .map_err(|e| DocumentError::Syntax(e.to_string()))?;
    let root = pairs
        .next()
        .and_then(|document| document.into_inner().find(|p| p.as_rule() == Rule::element))
        .ok_or_else(|| DocumentError::Syntax(String::from("no root element")))?;
    build_element(root)
}

fn build_element(pair: Pair<'_, Rule>) -> Result<Element, DocumentError> {
    debug_assert_eq!(Rule::element, pair.as_rule());
    let mut element = Element::default();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::tag => element.name = inner.as_str().to_string(),
            Rule::attribute => {
                let mut kv = inner.into_inner();
                if let (Some(key), Some(value)) = (kv.next(), kv.next()) {
                    let raw = value.as_str();
                    let unquoted = &raw[1..raw.len() - 1];
                    element.attributes.push((key.as_str().to_string(), unescape(unquoted)));
                }
            },
            Rule::element => element.children.push(build_element(inner)?),
            Rule::text => element.text.push_str(&unescape(inner.as_str())),
            Rule::end_tag => {
                if inner.as_str() != element.name {
                    return Err(DocumentError::MismatchedTag(
                        element.name,
                        inner.as_str().to_string(),
                    ));
                }
            },
            _ => {},
        }
    }
    Ok(element)
}

fn unescape(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    raw.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod test {
    use pest::{consumes_to, parses_to};

    use super::*;

    #[test]
    fn test_self_closing_with_attribute() {
        let input = r#"<provider ref="0xf00"/>"#;
        parses_to! {
            parser: GeomParser,
            input: input,
            rule: Rule::element,
            tokens: [
                element(0, 23, [
                    tag(1, 9),
                    attribute(9, 21, [attr_name(10, 13), value(14, 21)])
                ])
            ]
        };
    }

    #[test]
    fn test_tree() {
        let doc = r#"<?xml version="1.0"?>
<!-- generated -->
<mesh>
  <class id="0x1">
    <name>DEV</name>
    <geom id='0x2'><name>ada0</name></geom>
  </class>
</mesh>
"#;
        let mesh = parse_document(doc).unwrap();
        assert_eq!("mesh", mesh.name());
        let class = mesh.child("class").unwrap();
        assert_eq!(Some("0x1"), class.attribute("id"));
        assert_eq!(Some("DEV"), class.child_text("name"));
        let geom = class.children_named("geom").next().unwrap();
        assert_eq!(Some("0x2"), geom.attribute("id"));
        assert_eq!(Some("ada0"), geom.child_text("name"));
    }

    #[test]
    fn test_entities() {
        let doc = r#"<name a="x&amp;y">gpt/a&lt;b&gt;</name>"#;
        let name = parse_document(doc).unwrap();
        assert_eq!("gpt/a<b>", name.text());
        assert_eq!(Some("x&y"), name.attribute("a"));
    }

    #[test]
    fn test_mismatched_tag() {
        let err = parse_document("<a><b></a></b>").unwrap_err();
        assert_eq!(DocumentError::MismatchedTag(String::from("b"), String::from("a")), err);
    }

    #[test]
    fn test_garbage() {
        assert!(parse_document("not xml at all").is_err());
        assert!(parse_document("").is_err());
    }
}
