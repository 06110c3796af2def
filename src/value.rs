//! Values exchanged with library callables.

use crate::error::ConversionError;
use crate::mat::Mat;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Strip the namespace from a qualified type name (`org.lib.Mat` -> `Mat`).
pub fn simple_name(type_name: &str) -> &str {
    type_name.rsplit('.').next().unwrap_or(type_name)
}

/// Integer rectangle as the library represents it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    /// Left edge.
    pub x: i32,
    /// Top edge.
    pub y: i32,
    /// Width.
    pub width: i32,
    /// Height.
    pub height: i32,
}

impl Rect {
    /// Create a rectangle.
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// An opaque library object: a constructed instance or a non-matrix result.
#[derive(Clone)]
pub struct Object {
    type_name: String,
    payload: Arc<dyn Any + Send + Sync>,
}

impl Object {
    /// Wrap a payload under the given library type name.
    pub fn new<T: Any + Send + Sync>(type_name: impl Into<String>, payload: T) -> Self {
        Self {
            type_name: type_name.into(),
            payload: Arc::new(payload),
        }
    }

    /// Library type name (simple form).
    pub fn type_name(&self) -> &str {
        simple_name(&self.type_name)
    }

    /// Borrow the payload as `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    /// Returns true if both objects share the same payload.
    pub fn ptr_eq(&self, other: &Object) -> bool {
        Arc::ptr_eq(&self.payload, &other.payload)
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// A value passed to or returned from a library callable.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// No value (void return).
    #[default]
    Void,
    /// `boolean`.
    Bool(bool),
    /// `byte`.
    Byte(i8),
    /// `short`.
    Short(i16),
    /// `int`.
    Int(i32),
    /// `long`.
    Long(i64),
    /// `float`.
    Float(f32),
    /// `double`.
    Double(f64),
    /// `String`.
    Str(String),
    /// Library matrix.
    Mat(Mat),
    /// Library rectangle.
    Rect(Rect),
    /// Any other library object.
    Object(Object),
}

fn numeric_rank(type_name: &str) -> Option<u8> {
    match type_name {
        "byte" => Some(0),
        "short" => Some(1),
        "int" => Some(2),
        "long" => Some(3),
        "float" => Some(4),
        "double" => Some(5),
        _ => None,
    }
}

impl Value {
    /// Simple library type name of this value.
    pub fn type_name(&self) -> &str {
        match self {
            Value::Void => "void",
            Value::Bool(_) => "boolean",
            Value::Byte(_) => "byte",
            Value::Short(_) => "short",
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::Str(_) => "String",
            Value::Mat(_) => "Mat",
            Value::Rect(_) => "Rect",
            Value::Object(obj) => obj.type_name(),
        }
    }

    /// Returns true for [`Value::Void`].
    pub fn is_void(&self) -> bool {
        matches!(self, Value::Void)
    }

    /// Borrow the matrix, if this is one.
    pub fn as_mat(&self) -> Option<&Mat> {
        match self {
            Value::Mat(mat) => Some(mat),
            _ => None,
        }
    }

    /// Mutably borrow the matrix, if this is one.
    pub fn as_mat_mut(&mut self) -> Option<&mut Mat> {
        match self {
            Value::Mat(mat) => Some(mat),
            _ => None,
        }
    }

    /// Integral value widened to `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Byte(v) => Some(v.into()),
            Value::Short(v) => Some(v.into()),
            Value::Int(v) => Some(v.into()),
            Value::Long(v) => Some(v),
            _ => None,
        }
    }

    /// Numeric value widened to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Float(v) => Some(v.into()),
            Value::Double(v) => Some(v),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    /// Borrow the object payload as `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Value::Object(obj) => obj.downcast_ref(),
            _ => None,
        }
    }

    /// Convert this value for a parameter of type `param`.
    ///
    /// Exact type matches pass through; numeric values widen along
    /// `byte < short < int < long < float < double`; an `Object` parameter
    /// accepts anything except void. On mismatch the value is handed back.
    pub fn coerce(self, param: &str) -> Result<Value, Value> {
        let param = simple_name(param);
        if self.type_name() == param {
            return Ok(self);
        }
        if param == "Object" && !self.is_void() {
            return Ok(self);
        }
        let (Some(from), Some(to)) = (numeric_rank(self.type_name()), numeric_rank(param)) else {
            return Err(self);
        };
        if from > to {
            return Err(self);
        }
        let widened = match param {
            "short" => self.as_i64().map(|v| Value::Short(v as i16)),
            "int" => self.as_i64().map(|v| Value::Int(v as i32)),
            "long" => self.as_i64().map(Value::Long),
            "float" => self.as_f64().map(|v| Value::Float(v as f32)),
            "double" => self.as_f64().map(Value::Double),
            _ => None,
        };
        widened.ok_or(self)
    }

    /// Parse user-entered text as a value of primitive or string type.
    ///
    /// Integral targets go through a floating-point parse and truncate, so
    /// `"3.7"` becomes `3` for an `int` parameter. `byte` and `short` truncate
    /// to `int` first and then wrap, so `"200"` is `-56` as a `byte`.
    /// Booleans are `true` iff the text equals `"true"` ignoring case.
    pub fn parse(text: &str, type_name: &str) -> Result<Value, ConversionError> {
        let target = simple_name(type_name);
        let trimmed = text.trim();
        let fail = || ConversionError::Parse {
            text: text.to_string(),
            target: target.to_string(),
        };
        let float = || trimmed.parse::<f64>().map_err(|_| fail());
        Ok(match target {
            "boolean" => Value::Bool(trimmed.eq_ignore_ascii_case("true")),
            "byte" => Value::Byte(float()? as i32 as i8),
            "short" => Value::Short(float()? as i32 as i16),
            "int" => Value::Int(float()? as i32),
            "long" => Value::Long(float()? as i64),
            "float" => Value::Float(trimmed.parse::<f32>().map_err(|_| fail())?),
            "double" => Value::Double(float()?),
            "String" => Value::Str(text.to_string()),
            _ => return Err(fail()),
        })
    }
}

impl From<Mat> for Value {
    fn from(mat: Mat) -> Self {
        Value::Mat(mat)
    }
}

impl From<Rect> for Value {
    fn from(rect: Rect) -> Self {
        Value::Rect(rect)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<Object> for Value {
    fn from(obj: Object) -> Self {
        Value::Object(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mat::ElemType;

    #[test]
    fn test_simple_name() {
        assert_eq!(simple_name("org.lib.core.Mat"), "Mat");
        assert_eq!(simple_name("int"), "int");
        assert_eq!(simple_name(""), "");
    }

    #[test]
    fn test_type_names() {
        assert_eq!(Value::Void.type_name(), "void");
        assert_eq!(Value::Int(1).type_name(), "int");
        assert_eq!(Value::from(Mat::zeros(1, 1, ElemType::U8C1)).type_name(), "Mat");
        let obj = Object::new("org.lib.ml.Classifier", 7u32);
        assert_eq!(Value::from(obj).type_name(), "Classifier");
    }

    #[test]
    fn test_coerce_widens() {
        assert!(matches!(Value::Int(3).coerce("double"), Ok(Value::Double(v)) if v == 3.0));
        assert!(matches!(Value::Byte(-2).coerce("long"), Ok(Value::Long(-2))));
        assert!(matches!(Value::Float(1.5).coerce("float"), Ok(Value::Float(_))));
        assert!(matches!(Value::Double(1.0).coerce("int"), Err(Value::Double(_))));
        assert!(matches!(Value::Str("x".into()).coerce("int"), Err(_)));
    }

    #[test]
    fn test_coerce_qualified_and_object() {
        let mat = Value::from(Mat::zeros(2, 2, ElemType::U8C1));
        assert!(mat.coerce("org.lib.core.Mat").is_ok());
        assert!(Value::Int(1).coerce("org.lib.core.Object").is_ok());
        assert!(Value::Void.coerce("Object").is_err());
    }

    #[test]
    fn test_parse_truncates_integrals() {
        assert!(matches!(Value::parse("3.7", "int"), Ok(Value::Int(3))));
        assert!(matches!(Value::parse(" 12 ", "short"), Ok(Value::Short(12))));
        assert!(matches!(Value::parse("2.5", "double"), Ok(Value::Double(v)) if v == 2.5));
    }

    #[test]
    fn test_parse_narrows_by_wrapping() {
        assert!(matches!(Value::parse("200", "byte"), Ok(Value::Byte(-56))));
        assert!(matches!(Value::parse("-129.9", "byte"), Ok(Value::Byte(127))));
        assert!(matches!(Value::parse("40000", "short"), Ok(Value::Short(-25536))));
        assert!(matches!(Value::parse("1e12", "byte"), Ok(Value::Byte(-1))));
    }

    #[test]
    fn test_parse_boolean_and_string() {
        assert!(matches!(Value::parse("TRUE", "boolean"), Ok(Value::Bool(true))));
        assert!(matches!(Value::parse("yes", "boolean"), Ok(Value::Bool(false))));
        assert!(matches!(Value::parse(" a b ", "String"), Ok(Value::Str(s)) if s == " a b "));
    }

    #[test]
    fn test_parse_rejects() {
        assert!(Value::parse("abc", "int").is_err());
        assert!(Value::parse("1", "Mat").is_err());
    }

    #[test]
    fn test_object_downcast() {
        let obj = Object::new("Counter", 41u64);
        let value = Value::from(obj.clone());
        assert_eq!(value.downcast_ref::<u64>(), Some(&41));
        assert!(value.downcast_ref::<i32>().is_none());
        if let Value::Object(inner) = &value {
            assert!(inner.ptr_eq(&obj));
        }
    }
}
