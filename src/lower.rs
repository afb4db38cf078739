//! Lowering: turns `Expr` / `Predicate` trees into typed [`Target`] trees
//! for one [`Dialect`].
//!
//! Bindings map in-scope names to the target that produces their value:
//! `SELF` for the evaluated object and `$name` for variables. A subquery
//! lowers its predicate against a copy of the bindings; an assignment adds
//! its variable to the caller's map.
//!
//! In the Objects dialect every navigation step is wrapped in a null guard
//! (`a?.b?.c`). The Backend dialect leaves nulls to the backend.

pub mod comparison;
pub mod functions;

use std::collections::HashMap;

use tracing::debug;

use crate::ast::{CompoundKind, Expr, Predicate};
use crate::coerce::cast;
use crate::config::{CompileOptions, Dialect};
use crate::error::{Error, Result};
use crate::evaluator::{CompiledExpr, CompiledPredicate};
use crate::target::{BinaryOp, Node, Reduction, Target, UnaryOp};
use crate::types::TypeKind;

/// In-scope names and the targets that produce their values.
pub type Bindings = HashMap<String, Target>;

/// Binding key of the evaluated object.
pub const SELF_BINDING: &str = "SELF";

/// Binding key of a `$name` variable.
pub fn variable_key(name: &str) -> String {
    format!("${}", name)
}

/// Bindings for a root of kind `root` plus the external variables in `options`.
pub fn root_bindings(root: &TypeKind, options: &CompileOptions) -> Bindings {
    let mut bindings = Bindings::new();
    bindings.insert(
        SELF_BINDING.to_string(),
        Target::parameter(SELF_BINDING, root.clone()),
    );
    for (name, value) in &options.variables {
        bindings.insert(variable_key(name), Target::constant(value.clone()));
    }
    bindings
}

pub struct Lowerer<'o> {
    pub(crate) options: &'o CompileOptions,
    next_id: usize,
}

impl<'o> Lowerer<'o> {
    pub fn new(options: &'o CompileOptions) -> Self {
        Lowerer {
            options,
            next_id: 0,
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.options.dialect
    }

    /// A parameter name no source variable can collide with.
    pub(crate) fn fresh(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("#{}{}", prefix, self.next_id)
    }

    /// Applies `build` to `subject`, behind a null guard in the Objects dialect.
    pub(crate) fn guarded(
        &mut self,
        subject: Target,
        build: impl FnOnce(&mut Self, Target) -> Result<Target>,
    ) -> Result<Target> {
        let needs_guard = self.dialect() == Dialect::Objects
            && !matches!(subject.node, Node::Constant(ref v) if !v.is_null())
            && !matches!(subject.node, Node::List(_));
        if !needs_guard {
            return build(self, subject);
        }

        let binding = self.fresh("g");
        let parameter = Target::parameter(binding.clone(), subject.ty.clone());
        let body = build(self, parameter)?;
        Ok(Target {
            ty: body.ty.clone(),
            node: Node::Guard {
                subject: Box::new(subject),
                binding,
                body: Box::new(body),
            },
        })
    }

    /// Evaluates an effectful `subject` once, ahead of `build`, and hands
    /// `build` a parameter for it. Pure subjects pass through. The Backend
    /// dialect inlines the subject text either way.
    pub(crate) fn shared(
        &mut self,
        subject: Target,
        build: impl FnOnce(&mut Self, Target) -> Result<Target>,
    ) -> Result<Target> {
        if self.dialect() == Dialect::Backend || !subject.has_effects() {
            return build(self, subject);
        }

        let binding = self.fresh("b");
        let parameter = Target::parameter(binding.clone(), subject.ty.clone());
        let body = build(self, parameter)?;
        Ok(Target {
            ty: body.ty.clone(),
            node: Node::Bind {
                value: Box::new(subject),
                binding,
                body: Box::new(body),
            },
        })
    }

    pub fn lower_expr(&mut self, expr: &Expr, bindings: &mut Bindings) -> Result<Target> {
        match expr {
            Expr::Constant(value) => Ok(Target::constant(value.clone())),
            Expr::EvaluatedObject => bindings
                .get(SELF_BINDING)
                .cloned()
                .ok_or_else(|| Error::UnboundVariable(SELF_BINDING.to_string())),
            Expr::Variable(name) => bindings
                .get(&variable_key(name))
                .cloned()
                .ok_or_else(|| Error::UnboundVariable(name.clone())),
            Expr::KeyPath { operand, path } => {
                let root = match operand {
                    Some(operand) => self.lower_expr(operand, bindings)?,
                    None => self.lower_expr(&Expr::EvaluatedObject, bindings)?,
                };
                self.lower_key_path(root, path)
            }
            Expr::Function { name, args } => functions::lower_function(self, name, args, bindings),
            Expr::Subquery {
                collection,
                variable,
                predicate,
            } => self.lower_subquery(collection, variable, predicate, bindings),
            Expr::Aggregate(items) => self.lower_aggregate(items, bindings),
            Expr::Symbolic(symbol) => Err(Error::Type(format!(
                "{} is only meaningful as an index",
                symbol
            ))),
            Expr::Assignment { variable, value } => {
                let value = self.lower_expr(value, bindings)?;
                let key = variable_key(variable);
                bindings.insert(key.clone(), Target::parameter(key.clone(), value.ty.clone()));
                Ok(Target {
                    ty: value.ty.clone(),
                    node: Node::Let {
                        name: key,
                        value: Box::new(value),
                    },
                })
            }
        }
    }

    pub fn lower_predicate(
        &mut self,
        predicate: &Predicate,
        bindings: &mut Bindings,
    ) -> Result<Target> {
        match predicate {
            Predicate::Constant(value) => Ok(Target::boolean(*value)),
            Predicate::Comparison(c) => comparison::lower_comparison(self, c, bindings),
            Predicate::Compound {
                kind: CompoundKind::Not,
                subpredicates,
            } => {
                let inner = match subpredicates.as_slice() {
                    [inner] => self.lower_predicate(inner, bindings)?,
                    _ => {
                        return Err(Error::Type(format!(
                            "NOT takes exactly one predicate, got {}",
                            subpredicates.len()
                        )));
                    }
                };
                Ok(Target::unary(UnaryOp::Not, inner, TypeKind::Boolean))
            }
            Predicate::Compound {
                kind,
                subpredicates,
            } => {
                let op = if *kind == CompoundKind::And {
                    BinaryOp::AndAlso
                } else {
                    BinaryOp::OrElse
                };
                self.fold_compound(op, subpredicates, bindings)
            }
        }
    }

    /// Right fold; an empty list is false whatever the connective.
    fn fold_compound(
        &mut self,
        op: BinaryOp,
        subpredicates: &[Predicate],
        bindings: &mut Bindings,
    ) -> Result<Target> {
        match subpredicates {
            [] => Ok(Target::boolean(false)),
            [only] => self.lower_predicate(only, bindings),
            [first, rest @ ..] => {
                let first = self.lower_predicate(first, bindings)?;
                let rest = self.fold_compound(op, rest, bindings)?;
                Ok(Target::binary(op, first, rest, TypeKind::Boolean))
            }
        }
    }

    fn lower_key_path(&mut self, root: Target, path: &str) -> Result<Target> {
        let segments: Vec<&str> = path
            .split('.')
            .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("self"))
            .collect();
        self.walk(root, &segments)
    }

    fn walk(&mut self, receiver: Target, segments: &[&str]) -> Result<Target> {
        let Some((first, rest)) = segments.split_first() else {
            return Ok(receiver);
        };
        match first.strip_prefix('@') {
            // `items.@sum.price` reduces `items.price`.
            Some(operator) => {
                let source = self.walk(receiver, rest)?;
                self.collection_operator(source, operator)
            }
            None => {
                let next = self.step(receiver, first)?;
                self.walk(next, rest)
            }
        }
    }

    /// One property segment on `receiver`.
    fn step(&mut self, receiver: Target, segment: &str) -> Result<Target> {
        if let TypeKind::Sequence(element) = &receiver.ty {
            let parameter = self.fresh("e");
            let item = Target::parameter(parameter.clone(), (**element).clone());
            let body = self.step(item, segment)?;
            return Ok(Target {
                ty: TypeKind::sequence_of(body.ty.clone()),
                node: Node::Map {
                    source: Box::new(receiver),
                    parameter,
                    body: Box::new(body),
                },
            });
        }

        let ty = receiver.ty.property(segment)?;
        let name = segment.to_string();
        self.guarded(receiver, move |_, receiver| {
            Ok(Target {
                ty,
                node: Node::Property {
                    receiver: Box::new(receiver),
                    name,
                },
            })
        })
    }

    /// `@count`, `@sum`, `@avg`, `@min`, `@max`.
    fn collection_operator(&mut self, receiver: Target, operator: &str) -> Result<Target> {
        let element = receiver.ty.element_type().ok_or_else(|| {
            Error::Type(format!("@{} requires a collection, got {}", operator, receiver.ty))
        })?;

        let operator = operator.to_ascii_lowercase();
        if operator == "count" {
            return self.guarded(receiver, |_, source| Ok(Target::count(source)));
        }

        let reduction = match operator.as_str() {
            "sum" => Reduction::Sum,
            "avg" | "average" => Reduction::Average,
            "min" => Reduction::Min,
            "max" => Reduction::Max,
            other => {
                return Err(Error::Type(format!("unknown collection operator @{}", other)));
            }
        };
        self.reduce(receiver, reduction, &element)
    }

    pub(crate) fn reduce(
        &mut self,
        source: Target,
        reduction: Reduction,
        element: &TypeKind,
    ) -> Result<Target> {
        if !(element.is_numeric() || element.is_dynamic()) {
            let comparable = matches!(element, TypeKind::String | TypeKind::Date);
            if !(comparable && matches!(reduction, Reduction::Min | Reduction::Max)) {
                return Err(Error::Type(format!(
                    "cannot aggregate a collection of {}",
                    element
                )));
            }
        }
        let ty = match reduction {
            Reduction::Average if element.is_dynamic() => TypeKind::Any,
            Reduction::Average => TypeKind::Double,
            _ => element.clone(),
        };
        self.guarded(source, move |_, source| {
            Ok(Target {
                ty,
                node: Node::Reduce {
                    reduction,
                    source: Box::new(source),
                },
            })
        })
    }

    fn lower_subquery(
        &mut self,
        collection: &Expr,
        variable: &str,
        predicate: &Predicate,
        bindings: &Bindings,
    ) -> Result<Target> {
        let mut outer = bindings.clone();
        let source = self.lower_expr(collection, &mut outer)?;
        let element = source.ty.element_type().ok_or_else(|| {
            Error::Type(format!("SUBQUERY requires a collection, got {}", source.ty))
        })?;

        let parameter = variable_key(variable);
        let mut inner = outer;
        inner.insert(
            parameter.clone(),
            Target::parameter(parameter.clone(), element),
        );
        let predicate = self.lower_predicate(predicate, &mut inner)?;

        let ty = source.ty.clone();
        self.guarded(source, move |_, source| {
            Ok(Target {
                ty,
                node: Node::Filter {
                    source: Box::new(source),
                    parameter,
                    predicate: Box::new(predicate),
                },
            })
        })
    }

    fn lower_aggregate(&mut self, items: &[Expr], bindings: &mut Bindings) -> Result<Target> {
        let mut lowered = Vec::with_capacity(items.len());
        for item in items {
            lowered.push(self.lower_expr(item, bindings)?);
        }

        let element = common_kind(lowered.iter().map(|t| &t.ty));
        if element.is_castable() {
            lowered = lowered
                .into_iter()
                .map(|item| cast(item, &element))
                .collect::<Result<_>>()?;
        }

        Ok(Target {
            ty: TypeKind::sequence_of(element),
            node: Node::List(lowered),
        })
    }
}

/// The kind every item can be viewed as: the shared kind, the most precise
/// castable kind, or `Any`.
fn common_kind<'a>(kinds: impl Iterator<Item = &'a TypeKind>) -> TypeKind {
    let mut common: Option<TypeKind> = None;
    for kind in kinds {
        if *kind == TypeKind::Null {
            continue;
        }
        common = Some(match common {
            None => kind.clone(),
            Some(current) if current == *kind => current,
            Some(current) => match (current.precision_rank(), kind.precision_rank()) {
                (Some(a), Some(b)) if a >= b => current,
                (Some(_), Some(_)) => kind.clone(),
                _ => return TypeKind::Any,
            },
        });
    }
    common.unwrap_or(TypeKind::Any)
}

/// Lowers `predicate` against a root of kind `root`.
pub fn lower_predicate(
    predicate: &Predicate,
    root: &TypeKind,
    options: &CompileOptions,
) -> Result<Target> {
    let mut bindings = root_bindings(root, options);
    Lowerer::new(options).lower_predicate(predicate, &mut bindings)
}

/// Lowers `expr` against a root of kind `root`.
pub fn lower_expr(expr: &Expr, root: &TypeKind, options: &CompileOptions) -> Result<Target> {
    let mut bindings = root_bindings(root, options);
    Lowerer::new(options).lower_expr(expr, &mut bindings)
}

/// Compiles a predicate for objects of kind `root`.
///
/// ```
/// use sieve_lang::{compile_predicate, CompileOptions, Predicate, TypeKind, Value};
///
/// let predicate = Predicate::parse("SELF > 3", &[]).unwrap();
/// let compiled = compile_predicate(&predicate, &TypeKind::Long, &CompileOptions::new()).unwrap();
/// assert!(compiled.evaluate(&Value::Long(5)).unwrap());
/// ```
pub fn compile_predicate(
    predicate: &Predicate,
    root: &TypeKind,
    options: &CompileOptions,
) -> Result<CompiledPredicate> {
    debug!(dialect = %options.dialect, root = %root, "compiling predicate");
    let target = lower_predicate(predicate, root, options)?;
    Ok(CompiledPredicate::new(target, options))
}

/// Compiles an expression, optionally converting its result to `result`.
pub fn compile_expr(
    expr: &Expr,
    root: &TypeKind,
    result: Option<&TypeKind>,
    options: &CompileOptions,
) -> Result<CompiledExpr> {
    debug!(dialect = %options.dialect, root = %root, "compiling expression");
    let mut target = lower_expr(expr, root, options)?;
    if let Some(result) = result
        && target.ty != *result
        && !result.is_dynamic()
    {
        target = match target.as_constant() {
            Some(_) => cast(target, result)?,
            None => Target::convert(target, result.clone()),
        };
    }
    Ok(CompiledExpr::new(target, options))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RecordType;

    fn options(dialect: Dialect) -> CompileOptions {
        CompileOptions::new().dialect(dialect)
    }

    #[test]
    fn test_objects_dialect_guards_each_step() {
        let expr = Expr::key_path("author.name");
        let target = lower_expr(&expr, &TypeKind::Any, &options(Dialect::Objects)).unwrap();
        match target.node {
            Node::Guard { subject, body, .. } => {
                assert!(matches!(subject.node, Node::Guard { .. }));
                assert!(matches!(body.node, Node::Property { .. }));
            }
            other => panic!("expected guard, got {:?}", other),
        }
    }

    #[test]
    fn test_backend_dialect_has_no_guards() {
        let expr = Expr::key_path("author.name");
        let target = lower_expr(&expr, &TypeKind::Any, &options(Dialect::Backend)).unwrap();
        match target.node {
            Node::Property { receiver, name } => {
                assert_eq!(name, "name");
                assert!(matches!(receiver.node, Node::Property { .. }));
            }
            other => panic!("expected property, got {:?}", other),
        }
    }

    #[test]
    fn test_sequence_segment_maps() {
        let root = RecordType::new("Post")
            .field(
                "tags",
                TypeKind::sequence_of(
                    RecordType::new("Tag").field("name", TypeKind::String).into_kind(),
                ),
            )
            .into_kind();
        let target =
            lower_expr(&Expr::key_path("tags.name"), &root, &options(Dialect::Backend)).unwrap();
        assert_eq!(target.ty, TypeKind::sequence_of(TypeKind::String));
        assert!(matches!(target.node, Node::Map { .. }));
    }

    #[test]
    fn test_closed_record_rejects_unknown_segment() {
        let root = RecordType::new("Post").into_kind();
        let result = lower_expr(&Expr::key_path("title"), &root, &CompileOptions::new());
        assert!(matches!(result, Err(Error::Type(_))));
    }

    #[test]
    fn test_unbound_variable() {
        let result = lower_expr(&Expr::variable("missing"), &TypeKind::Any, &CompileOptions::new());
        assert_eq!(result, Err(Error::UnboundVariable("missing".to_string())));
    }

    #[test]
    fn test_assignment_extends_caller_bindings() {
        let options = CompileOptions::new();
        let mut bindings = root_bindings(&TypeKind::Any, &options);
        let mut lowerer = Lowerer::new(&options);
        let assignment = Expr::assignment("a", Expr::constant(3));
        lowerer.lower_expr(&assignment, &mut bindings).unwrap();
        assert!(bindings.contains_key("$a"));
        assert!(lowerer.lower_expr(&Expr::variable("a"), &mut bindings).is_ok());
    }

    #[test]
    fn test_subquery_does_not_leak_its_variable() {
        let options = CompileOptions::new();
        let mut bindings = root_bindings(&TypeKind::Any, &options);
        let subquery = Expr::subquery(
            Expr::key_path("items"),
            "k",
            Predicate::Constant(true),
        );
        Lowerer::new(&options)
            .lower_expr(&subquery, &mut bindings)
            .unwrap();
        assert!(!bindings.contains_key("$k"));
    }

    #[test]
    fn test_empty_compounds_are_false() {
        let target = lower_predicate(&Predicate::and(vec![]), &TypeKind::Any, &CompileOptions::new())
            .unwrap();
        assert_eq!(target.as_constant(), Some(&crate::value::Value::Boolean(false)));
    }

    #[test]
    fn test_symbolic_outside_index_is_type_error() {
        let result = lower_expr(
            &Expr::symbolic(crate::ast::SymbolicValue::Last),
            &TypeKind::Any,
            &CompileOptions::new(),
        );
        assert!(matches!(result, Err(Error::Type(_))));
    }
}
