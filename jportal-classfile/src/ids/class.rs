use super::{field::FieldDescriptor, CharCursor, BANNED_IDENT_CHARS};

/// A class name, parsed from a `CONSTANT_Class_info`'s UTF-8 entry.
///
/// Internal form uses `/` as the package separator and `$` to separate an
/// enclosing class from an inner class, e.g. `com/exopteron/Exo$Inner`.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ClassName {
    pub package: Vec<String>,
    pub class_name: String,
    pub inner_class: Option<Box<ClassName>>,
}

impl ClassName {
    pub fn parse_str(s: &str) -> Option<Self> {
        let mut cur = CharCursor::new(s);
        Self::parse(&mut cur).filter(|_| cur.at_end())
    }

    pub(crate) fn parse(cur: &mut CharCursor) -> Option<Self> {
        let mut sections = vec![parse_section(cur)?];
        loop {
            if cur.eat('$') {
                let inner_class = Some(Box::new(Self::parse(cur)?));
                let class_name = sections.pop()?;
                return Some(Self {
                    package: sections,
                    class_name,
                    inner_class,
                });
            }
            if cur.eat('/') {
                sections.push(parse_section(cur)?);
            } else {
                break;
            }
        }
        let class_name = sections.pop()?;
        Some(Self {
            package: sections,
            class_name,
            inner_class: None,
        })
    }

    /// The name as it would appear in the original `/`-and-`$`-separated form.
    pub fn display_name(&self) -> String {
        let mut s = self.package.join("/");
        if !s.is_empty() {
            s.push('/');
        }
        s.push_str(&self.class_name);
        if let Some(inner) = &self.inner_class {
            s.push('$');
            s.push_str(&inner.display_name());
        }
        s
    }
}

/// The original parser reads one `/`-delimited section at a time, including
/// the trailing section containing the class's own name; `parse` above
/// re-splits those into `package` + `class_name`.
fn parse_section(cur: &mut CharCursor) -> Option<String> {
    let mut s = String::new();
    while let Some(c) = cur.peek() {
        if c.is_whitespace() || c == '/' || c == '$' || BANNED_IDENT_CHARS.contains(&c) {
            break;
        }
        s.push(c);
        cur.bump();
    }
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// A class reference name: either a plain class name or an array descriptor
/// (used where the verifier needs to accept both, e.g. `CONSTANT_Class_info`
/// pointing at an array type).
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClassRefName {
    Class(ClassName),
    Array(FieldDescriptor),
}

impl ClassRefName {
    pub fn parse_str(s: &str) -> Option<Self> {
        if let Some(v) = ClassName::parse_str(s) {
            return Some(Self::Class(v));
        }
        FieldDescriptor::parse_str(s).map(Self::Array)
    }
}

#[cfg(test)]
mod tests {
    use super::ClassName;

    #[test]
    fn parses_simple_name() {
        let cn = ClassName::parse_str("java/lang/Object").unwrap();
        assert_eq!(cn.package, vec!["java".to_string(), "lang".to_string()]);
        assert_eq!(cn.class_name, "Object");
        assert!(cn.inner_class.is_none());
    }

    #[test]
    fn parses_inner_class() {
        let cn = ClassName::parse_str("com/exopteron/Exo$Inner").unwrap();
        assert_eq!(cn.class_name, "Exo");
        let inner = cn.inner_class.unwrap();
        assert_eq!(inner.class_name, "Inner");
    }

    #[test]
    fn round_trips_display_name() {
        let s = "com/exopteron/Exo$Inner";
        assert_eq!(ClassName::parse_str(s).unwrap().display_name(), s);
    }

    #[test]
    fn rejects_empty() {
        assert!(ClassName::parse_str("").is_none());
    }
}
