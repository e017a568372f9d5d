use super::{field::FieldType, CharCursor};

/// `V`, the return descriptor of a method returning no value.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct VoidDescriptor;

impl VoidDescriptor {
    fn parse(cur: &mut CharCursor) -> Option<Self> {
        cur.expect('V')?;
        Some(Self)
    }
}

/// A single parameter type inside a method descriptor's parens.
pub type ParameterDescriptor = FieldType;

/// Either a field type or `void`.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReturnDescriptor {
    Field(FieldType),
    Void(VoidDescriptor),
}

impl ReturnDescriptor {
    fn parse(cur: &mut CharCursor) -> Option<Self> {
        if cur.peek() == Some('V') {
            return VoidDescriptor::parse(cur).map(Self::Void);
        }
        FieldType::parse(cur).map(Self::Field)
    }

    pub fn display(&self) -> String {
        match self {
            Self::Field(f) => f.display(),
            Self::Void(_) => "V".to_string(),
        }
    }
}

/// `(<parameter descriptors>)<return descriptor>`
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct MethodDescriptor {
    pub parameters: Vec<ParameterDescriptor>,
    pub return_desc: ReturnDescriptor,
}

impl MethodDescriptor {
    pub fn parse_str(s: &str) -> Option<Self> {
        let mut cur = CharCursor::new(s);
        let v = Self::parse(&mut cur)?;
        if cur.at_end() {
            Some(v)
        } else {
            None
        }
    }

    fn parse(cur: &mut CharCursor) -> Option<Self> {
        cur.expect('(')?;
        let mut parameters = Vec::new();
        while cur.peek() != Some(')') {
            parameters.push(FieldType::parse(cur)?);
        }
        cur.expect(')')?;
        let return_desc = ReturnDescriptor::parse(cur)?;
        Some(Self {
            parameters,
            return_desc,
        })
    }

    /// The descriptor string this was parsed from, e.g. `(ILjava/lang/String;)Z`.
    pub fn display_descriptor(&self) -> String {
        let mut s = String::from("(");
        for p in &self.parameters {
            s.push_str(&p.display());
        }
        s.push(')');
        s.push_str(&self.return_desc.display());
        s
    }
}

/// A method's unqualified name, distinguishing the two special names the VM
/// reserves from ordinary identifiers.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum MethodName {
    /// `<clinit>`, a class or interface initialization method.
    Clinit,
    /// `<init>`, an instance initialization method.
    Init,
    Generic(String),
}

impl MethodName {
    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "<clinit>" => Some(Self::Clinit),
            "<init>" => Some(Self::Init),
            _ => {
                super::UnqualifiedName::new(s)?;
                Some(Self::Generic(s.to_string()))
            }
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            Self::Clinit => "<clinit>",
            Self::Init => "<init>",
            Self::Generic(s) => s,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{MethodDescriptor, MethodName, ReturnDescriptor};
    use crate::ids::field::{BaseType, FieldType};

    #[test]
    fn parses_no_arg_void() {
        let d = MethodDescriptor::parse_str("()V").unwrap();
        assert!(d.parameters.is_empty());
        assert!(matches!(d.return_desc, ReturnDescriptor::Void(_)));
    }

    #[test]
    fn parses_mixed_args() {
        let d = MethodDescriptor::parse_str("(ILjava/lang/String;[B)Z").unwrap();
        assert_eq!(d.parameters.len(), 3);
        assert!(matches!(d.parameters[0], FieldType::BaseType(BaseType::Int)));
        assert!(matches!(d.return_desc, ReturnDescriptor::Field(FieldType::BaseType(BaseType::Boolean))));
    }

    #[test]
    fn round_trips_display_descriptor() {
        let s = "(ILjava/lang/String;[B)Z";
        assert_eq!(MethodDescriptor::parse_str(s).unwrap().display_descriptor(), s);
        assert_eq!(MethodDescriptor::parse_str("()V").unwrap().display_descriptor(), "()V");
    }

    #[test]
    fn recognizes_special_names() {
        assert_eq!(MethodName::parse_str("<init>").unwrap(), MethodName::Init);
        assert_eq!(MethodName::parse_str("<clinit>").unwrap(), MethodName::Clinit);
        assert_eq!(
            MethodName::parse_str("doStuff").unwrap(),
            MethodName::Generic("doStuff".to_string())
        );
    }
}
