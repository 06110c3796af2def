//! Human-readable member signatures.
//!
//! Signatures use simple type names only: `Mat threshold(Mat, int)`.
//! Zero parameters render as `name()`.

use crate::loader::{ConstructorDef, OperationDef};
use crate::value::simple_name;

fn param_list(params: &[String]) -> String {
    params
        .iter()
        .map(|p| simple_name(p))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `ReturnType name(Param, ...)`.
pub fn operation_signature(op: &OperationDef) -> String {
    format!(
        "{} {}({})",
        simple_name(&op.returns),
        op.name,
        param_list(&op.params)
    )
}

/// `TypeName(Param, ...)`.
pub fn constructor_signature(type_name: &str, ctor: &ConstructorDef) -> String {
    format!("{}({})", simple_name(type_name), param_list(&ctor.params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_operation_signature() {
        let op = OperationDef::new(
            "threshold",
            "org.lib.core.Mat",
            &["org.lib.core.Mat", "int"],
            |_| Ok(Value::Void),
        );
        assert_eq!(operation_signature(&op), "Mat threshold(Mat, int)");

        let op = OperationDef::new("version", "String", &[], |_| Ok(Value::Void));
        assert_eq!(operation_signature(&op), "String version()");
    }

    #[test]
    fn test_constructor_signature() {
        let ctor = ConstructorDef::new(&["double", "org.lib.core.Size"], |_| Ok(Value::Void));
        assert_eq!(
            constructor_signature("org.lib.ml.Classifier", &ctor),
            "Classifier(double, Size)"
        );
    }
}
