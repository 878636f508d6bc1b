//! Expression dispatch: operators, iterators, projection, and truth.
//!
//! [`open`] normalizes an expression (constructor expansion) and builds the
//! producer network for it. Producers for composite operators hold their
//! operand producers open only as long as needed: a consumer that takes one
//! binding and drops the stream releases everything downstream.
//!
//! Truth evaluation is closed-world: an atom is true iff it is recorded as
//! an instance, false if it is recorded as a non-instance, and false
//! otherwise.

use crate::ast::{Expression, IteratorKind, Operator, Primitive};
use crate::error::{EvalError, TypeError};
use crate::eval::stream::{Once, Producer, Stream, Unify};
use crate::eval::{Context, StreamItem};
use crate::facts::{Fact, FactRegistry, PrimitiveType};
use crate::knowledge::content_hash;

/// Opens a binding stream for an expression.
pub fn open(ctx: &Context<'_>, expr: &Expression) -> Result<Stream, EvalError> {
    let expanded = expand(ctx.registry, expr)?;
    Ok(Stream::from_producer(producer_for(expanded)))
}

/// Pulls the first binding of an expression, cancelling the rest.
pub fn first(ctx: &Context<'_>, expr: &Expression) -> Result<Option<Expression>, EvalError> {
    let mut stream = open(ctx, expr)?;
    match stream.next(ctx) {
        None => Ok(None),
        Some(item) => item.map(Some),
    }
}

/// Drains an expression's stream into a vector.
pub fn gather(ctx: &Context<'_>, expr: &Expression) -> Result<Vec<Expression>, EvalError> {
    let mut stream = open(ctx, expr)?;
    let mut bindings = Vec::new();
    while let Some(item) = stream.next(ctx) {
        bindings.push(item?);
    }
    Ok(bindings)
}

/// Evaluates the truth of a single binding.
///
/// Primitives coerce the usual way (non-zero, non-empty, the boolean
/// itself); a ground constructor is looked up in the knowledge base after
/// conversion. Anything else reaching this function is a reasoner bug and
/// reports as an internal error.
pub fn truth(ctx: &Context<'_>, binding: &Expression) -> Result<bool, EvalError> {
    match binding {
        Expression::Primitive(Primitive::Bool(b)) => Ok(*b),
        Expression::Primitive(Primitive::Int(n)) => Ok(*n > 0),
        Expression::Primitive(Primitive::String(s)) => Ok(!s.is_empty()),
        Expression::Constructor { .. } => {
            if binding.find_variable().is_some() {
                return Err(EvalError::Internal(format!(
                    "instance contains variables: {}",
                    binding
                )));
            }
            let converted = ctx.registry.convert_instance(binding)?;
            let (name, _) = converted
                .as_constructor()
                .unwrap_or(("", &[]));
            let hash = content_hash(&converted);
            Ok(ctx.kb.has_instance(name, hash))
        }
        other => Err(EvalError::Internal(format!(
            "cannot evaluate truth of {}",
            other
        ))),
    }
}

/// Substitutes a fact's parameters into one of its clauses.
///
/// The clause is expanded first, so a bare composite reference picks up its
/// parameter variables and then has them substituted along with everything
/// else. Used by triggers, `Enabled`, and the violated-when check.
pub fn fill_parameters(
    registry: &FactRegistry,
    expr: &Expression,
    params: &[String],
    values: &[Expression],
) -> Result<Expression, EvalError> {
    let mut filled = expand(registry, expr)?;
    for (param, value) in params.iter().zip(values) {
        filled.substitute(param, value);
    }
    Ok(filled)
}

/// Normalizes an expression before evaluation: constructor applications of
/// composite facts with no operands gain one variable reference per
/// declared parameter, and unknown fact references are rejected. Only
/// constructor and operator operands are descended; iterator bodies and
/// projection operands normalize when their own streams open.
pub(crate) fn expand(registry: &FactRegistry, expr: &Expression) -> Result<Expression, EvalError> {
    match expr {
        Expression::Constructor {
            identifier,
            operands,
        } => {
            let fact = registry
                .get(identifier)
                .ok_or_else(|| TypeError::UnknownFact(identifier.clone()))?;
            let operands = if operands.is_empty() {
                match fact.as_composite() {
                    Some(composite) => composite
                        .identified_by
                        .iter()
                        .map(Expression::var)
                        .collect(),
                    None => Vec::new(),
                }
            } else {
                operands
                    .iter()
                    .map(|operand| expand(registry, operand))
                    .collect::<Result<Vec<_>, _>>()?
            };
            Ok(Expression::constructor(identifier.clone(), operands))
        }
        Expression::Operator { operator, operands } => {
            let operands = operands
                .iter()
                .map(|operand| expand(registry, operand))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Expression::operator(*operator, operands))
        }
        other => Ok(other.clone()),
    }
}

/// Builds the producer for an already-expanded expression. Free variables
/// anywhere in constructor or operator position wrap the whole expression
/// in a unification producer first.
pub(crate) fn producer_for(expr: Expression) -> Box<dyn Producer> {
    if let Some(variable) = expr.find_variable() {
        let variable = variable.to_string();
        return Box::new(Unify::new(expr, variable));
    }
    match expr {
        Expression::Primitive(_) => Box::new(Once::ok(expr)),
        // A bare variable reference is caught by the unification branch.
        Expression::VarRef(name) => Box::new(Fail::new(EvalError::Internal(format!(
            "unresolved variable reference {}",
            name
        )))),
        Expression::Constructor {
            identifier,
            operands,
        } => Box::new(ConstructorProducer {
            identifier,
            operands,
            done: false,
        }),
        Expression::Operator { operator, operands } => operator_producer(operator, operands),
        Expression::Iterator {
            iterator: IteratorKind::Foreach,
            expression,
            ..
        } => Box::new(ForeachProducer {
            body: Some(*expression),
            inner: None,
        }),
        Expression::Iterator {
            iterator: IteratorKind::Exists,
            expression,
            ..
        } => Box::new(ExistsProducer {
            body: Some(*expression),
            inner: None,
            done: false,
        }),
        Expression::Projection { parameter, operand } => Box::new(ProjectionProducer {
            parameter,
            operand: Some(*operand),
            inner: None,
            done: false,
        }),
    }
}

fn operator_producer(operator: Operator, operands: Vec<Expression>) -> Box<dyn Producer> {
    match operator {
        op if op.is_arithmetic() => Box::new(Arithmetic {
            operator,
            operands,
            done: false,
        }),
        Operator::Eq | Operator::Neq => Box::new(Equality {
            negated: operator == Operator::Neq,
            operands,
            done: false,
        }),
        Operator::And | Operator::Or => Box::new(Junction {
            conjunctive: operator == Operator::And,
            operands,
            done: false,
        }),
        Operator::Not => Box::new(NotProducer {
            operands,
            done: false,
        }),
        Operator::When => Box::new(WhenProducer {
            operands,
            state: WhenState::Start,
        }),
        Operator::Count | Operator::Sum | Operator::Max | Operator::Min => Box::new(Aggregate {
            operator,
            operands,
            done: false,
        }),
        Operator::Holds => Box::new(HoldsProducer {
            operands,
            done: false,
        }),
        Operator::Enabled => Box::new(EnabledProducer {
            operands,
            done: false,
        }),
        // Arithmetic is matched by the guard above.
        _ => Box::new(Fail::new(EvalError::Internal(format!(
            "no producer for operator {}",
            operator
        )))),
    }
}

/// Pulls the first binding of a sub-operand, releasing its producer.
fn first_of(ctx: &Context<'_>, operand: &Expression) -> StreamItem {
    producer_for(operand.clone()).next(ctx)
}

/// Coerces an atomic `Int` instance to its payload; everything else passes
/// through untouched.
pub(crate) fn instance_to_int(registry: &FactRegistry, expr: &Expression) -> Expression {
    if let Some((identifier, operands)) = expr.as_constructor() {
        if operands.len() == 1 {
            if let Some(atomic) = registry.get(identifier).and_then(Fact::as_atomic) {
                if atomic.ty == Some(PrimitiveType::Int) {
                    return operands[0].clone();
                }
            }
        }
    }
    expr.clone()
}

fn expect_int(
    ctx: &Context<'_>,
    binding: &Expression,
    op: &'static str,
) -> Result<i64, EvalError> {
    match instance_to_int(ctx.registry, binding) {
        Expression::Primitive(Primitive::Int(n)) => Ok(n),
        _ => Err(EvalError::NotAnInt { op }),
    }
}

/// Structural content equality, comparing across the atomic-wrapper
/// boundary: `F("x") == "x"` when `F` is an atomic `String` fact.
pub(crate) fn equal_contents(registry: &FactRegistry, a: &Expression, b: &Expression) -> bool {
    match (a, b) {
        (Expression::Primitive(pa), Expression::Primitive(pb)) => pa == pb,
        (Expression::Primitive(_), Expression::Constructor { .. }) => {
            unwrapped_payload(registry, b)
                .map(|payload| equal_contents(registry, a, payload))
                .unwrap_or(false)
        }
        (Expression::Constructor { .. }, Expression::Primitive(_)) => {
            unwrapped_payload(registry, a)
                .map(|payload| equal_contents(registry, payload, b))
                .unwrap_or(false)
        }
        (
            Expression::Constructor {
                identifier: ia,
                operands: oa,
            },
            Expression::Constructor {
                identifier: ib,
                operands: ob,
            },
        ) => {
            if oa.len() != ob.len() {
                return false;
            }
            let (Some(fa), Some(fb)) = (registry.get(ia), registry.get(ib)) else {
                return false;
            };
            match (fa, fb) {
                (Fact::Atomic(aa), Fact::Atomic(ab)) if oa.len() == 1 => {
                    aa.ty == ab.ty && equal_contents(registry, &oa[0], &ob[0])
                }
                (Fact::Atomic(_), Fact::Atomic(_)) => ia == ib,
                (Fact::Composite(_), Fact::Composite(_)) => {
                    ia == ib
                        && oa
                            .iter()
                            .zip(ob)
                            .all(|(x, y)| equal_contents(registry, x, y))
                }
                _ => false,
            }
        }
        _ => a == b,
    }
}

fn unwrapped_payload<'e>(registry: &FactRegistry, expr: &'e Expression) -> Option<&'e Expression> {
    let (identifier, operands) = expr.as_constructor()?;
    registry.get(identifier)?.as_atomic()?;
    if operands.len() == 1 {
        Some(&operands[0])
    } else {
        None
    }
}

/// Yields one error, then exhausts.
struct Fail {
    err: Option<EvalError>,
}

impl Fail {
    fn new(err: EvalError) -> Fail {
        Fail { err: Some(err) }
    }
}

impl Producer for Fail {
    fn next(&mut self, _ctx: &Context<'_>) -> StreamItem {
        self.err.take().map(Err)
    }
}

/// Resolves each operand to its first binding and yields the constructor
/// once. An operand with no bindings makes the whole constructor silent.
struct ConstructorProducer {
    identifier: String,
    operands: Vec<Expression>,
    done: bool,
}

impl Producer for ConstructorProducer {
    fn next(&mut self, ctx: &Context<'_>) -> StreamItem {
        if self.done {
            return None;
        }
        self.done = true;
        let mut resolved = Vec::with_capacity(self.operands.len());
        for operand in &self.operands {
            match first_of(ctx, operand) {
                None => return None,
                Some(Err(err)) => return Some(Err(err)),
                Some(Ok(binding)) => resolved.push(binding),
            }
        }
        Some(Ok(Expression::constructor(self.identifier.clone(), resolved)))
    }
}

struct Arithmetic {
    operator: Operator,
    operands: Vec<Expression>,
    done: bool,
}

impl Producer for Arithmetic {
    fn next(&mut self, ctx: &Context<'_>) -> StreamItem {
        if self.done {
            return None;
        }
        self.done = true;
        Some(self.compute(ctx))
    }
}

impl Arithmetic {
    fn compute(&self, ctx: &Context<'_>) -> Result<Expression, EvalError> {
        let op = self.operator.as_str();
        if self.operands.len() != 2 {
            return Err(EvalError::Internal(format!(
                "operator {} expects two operands",
                op
            )));
        }
        let lhs = match first_of(ctx, &self.operands[0]) {
            None => return Err(EvalError::MissingOperand { op }),
            Some(item) => item?,
        };
        let rhs = match first_of(ctx, &self.operands[1]) {
            None => return Err(EvalError::MissingOperand { op }),
            Some(item) => item?,
        };
        let a = expect_int(ctx, &lhs, op)?;
        let b = expect_int(ctx, &rhs, op)?;
        Ok(match self.operator {
            Operator::Add => Expression::int(a.wrapping_add(b)),
            Operator::Sub => Expression::int(a.wrapping_sub(b)),
            Operator::Mul => Expression::int(a.wrapping_mul(b)),
            Operator::Div => {
                if b == 0 {
                    return Err(EvalError::DivisionByZero);
                }
                Expression::int(a / b)
            }
            Operator::Mod => {
                if b == 0 {
                    return Err(EvalError::DivisionByZero);
                }
                Expression::int(a % b)
            }
            Operator::Lt => Expression::bool(a < b),
            Operator::Gt => Expression::bool(a > b),
            Operator::Lte => Expression::bool(a <= b),
            Operator::Gte => Expression::bool(a >= b),
            _ => {
                return Err(EvalError::Internal(format!(
                    "operator {} is not arithmetic",
                    op
                )))
            }
        })
    }
}

struct Equality {
    negated: bool,
    operands: Vec<Expression>,
    done: bool,
}

impl Producer for Equality {
    fn next(&mut self, ctx: &Context<'_>) -> StreamItem {
        if self.done {
            return None;
        }
        self.done = true;
        if self.operands.len() != 2 {
            return Some(Err(EvalError::Internal(
                "equality expects two operands".to_string(),
            )));
        }
        let lhs = match first_of(ctx, &self.operands[0]) {
            Some(Err(err)) => return Some(Err(err)),
            Some(Ok(binding)) => Some(binding),
            None => None,
        };
        let rhs = match first_of(ctx, &self.operands[1]) {
            Some(Err(err)) => return Some(Err(err)),
            Some(Ok(binding)) => Some(binding),
            None => None,
        };
        let equal = match (lhs, rhs) {
            (Some(a), Some(b)) => equal_contents(ctx.registry, &a, &b),
            _ => false,
        };
        Some(Ok(Expression::bool(equal != self.negated)))
    }
}

/// N-ary `AND`/`OR` with short-circuit over operand truth.
struct Junction {
    conjunctive: bool,
    operands: Vec<Expression>,
    done: bool,
}

impl Producer for Junction {
    fn next(&mut self, ctx: &Context<'_>) -> StreamItem {
        if self.done {
            return None;
        }
        self.done = true;
        let mut result = self.conjunctive;
        for operand in &self.operands {
            let value = match first_of(ctx, operand) {
                None => false,
                Some(Err(err)) => return Some(Err(err)),
                Some(Ok(binding)) => match truth(ctx, &binding) {
                    Ok(value) => value,
                    Err(err) => return Some(Err(err)),
                },
            };
            if self.conjunctive {
                result = result && value;
                if !result {
                    break;
                }
            } else {
                result = result || value;
                if result {
                    break;
                }
            }
        }
        Some(Ok(Expression::bool(result)))
    }
}

/// Negation. While an assumption sink is installed, a negated literal that
/// is not explicitly false records a tentative absence assumption.
struct NotProducer {
    operands: Vec<Expression>,
    done: bool,
}

impl Producer for NotProducer {
    fn next(&mut self, ctx: &Context<'_>) -> StreamItem {
        if self.done {
            return None;
        }
        self.done = true;
        let operand = match self.operands.first() {
            Some(operand) => operand,
            None => return Some(Err(EvalError::MissingOperand { op: "NOT" })),
        };
        let binding = match first_of(ctx, operand) {
            None => return Some(Ok(Expression::bool(true))),
            Some(Err(err)) => return Some(Err(err)),
            Some(Ok(binding)) => binding,
        };
        if let Some(sink) = ctx.assumptions {
            if binding.as_constructor().is_some() {
                if let Ok(converted) = ctx.registry.convert_instance(&binding) {
                    let (name, _) = converted.as_constructor().unwrap_or(("", &[]));
                    let hash = content_hash(&converted);
                    if !ctx.kb.has_non_instance(name, hash) {
                        sink.record(hash, ctx.kb.snapshot());
                    }
                }
            }
        }
        match truth(ctx, &binding) {
            Ok(value) => Some(Ok(Expression::bool(!value))),
            Err(err) => Some(Err(err)),
        }
    }
}

enum WhenState {
    Start,
    Streaming(Box<dyn Producer>),
    Done,
}

/// `WHEN body condition`: evaluates the condition once; when it holds,
/// streams every binding of the body.
struct WhenProducer {
    operands: Vec<Expression>,
    state: WhenState,
}

impl Producer for WhenProducer {
    fn next(&mut self, ctx: &Context<'_>) -> StreamItem {
        loop {
            match &mut self.state {
                WhenState::Done => return None,
                WhenState::Streaming(inner) => match inner.next(ctx) {
                    Some(item) => return Some(item),
                    None => {
                        self.state = WhenState::Done;
                        return None;
                    }
                },
                WhenState::Start => {
                    if self.operands.len() != 2 {
                        self.state = WhenState::Done;
                        return Some(Err(EvalError::Internal(
                            "WHEN expects two operands".to_string(),
                        )));
                    }
                    let holds = match first_of(ctx, &self.operands[1]) {
                        None => false,
                        Some(Err(err)) => {
                            self.state = WhenState::Done;
                            return Some(Err(err));
                        }
                        Some(Ok(binding)) => match truth(ctx, &binding) {
                            Ok(value) => value,
                            Err(err) => {
                                self.state = WhenState::Done;
                                return Some(Err(err));
                            }
                        },
                    };
                    if !holds {
                        self.state = WhenState::Done;
                        return None;
                    }
                    self.state = WhenState::Streaming(producer_for(self.operands[0].clone()));
                }
            }
        }
    }
}

/// `COUNT`/`SUM`/`MAX`/`MIN`: drains the operand stream into one integer.
/// Empty streams yield 0, including for `MAX` and `MIN`.
struct Aggregate {
    operator: Operator,
    operands: Vec<Expression>,
    done: bool,
}

impl Producer for Aggregate {
    fn next(&mut self, ctx: &Context<'_>) -> StreamItem {
        if self.done {
            return None;
        }
        self.done = true;
        Some(self.drain(ctx))
    }
}

impl Aggregate {
    fn drain(&self, ctx: &Context<'_>) -> Result<Expression, EvalError> {
        let op = self.operator.as_str();
        let operand = self
            .operands
            .first()
            .ok_or(EvalError::MissingOperand { op: "COUNT" })?;
        let mut inner = producer_for(operand.clone());
        let mut count = 0i64;
        let mut sum = 0i64;
        let mut extremum: Option<i64> = None;
        while let Some(item) = inner.next(ctx) {
            let binding = item?;
            match self.operator {
                Operator::Count => count += 1,
                Operator::Sum => sum = sum.wrapping_add(expect_int(ctx, &binding, op)?),
                Operator::Max => {
                    let value = expect_int(ctx, &binding, op)?;
                    extremum = Some(extremum.map_or(value, |current| current.max(value)));
                }
                Operator::Min => {
                    let value = expect_int(ctx, &binding, op)?;
                    extremum = Some(extremum.map_or(value, |current| current.min(value)));
                }
                _ => {
                    return Err(EvalError::Internal(format!(
                        "operator {} is not an aggregate",
                        op
                    )))
                }
            }
        }
        Ok(Expression::int(match self.operator {
            Operator::Count => count,
            Operator::Sum => sum,
            _ => extremum.unwrap_or(0),
        }))
    }
}

/// `HOLDS e`: whether the instance `e` evaluates to currently holds.
struct HoldsProducer {
    operands: Vec<Expression>,
    done: bool,
}

impl Producer for HoldsProducer {
    fn next(&mut self, ctx: &Context<'_>) -> StreamItem {
        if self.done {
            return None;
        }
        self.done = true;
        let operand = match self.operands.first() {
            Some(operand) => operand,
            None => return Some(Err(EvalError::MissingOperand { op: "HOLDS" })),
        };
        let binding = match first_of(ctx, operand) {
            None => return Some(Err(EvalError::MissingOperand { op: "HOLDS" })),
            Some(Err(err)) => return Some(Err(err)),
            Some(Ok(binding)) => binding,
        };
        if binding.as_constructor().is_none() {
            return Some(Err(EvalError::HoldsOnLiteral));
        }
        match truth(ctx, &binding) {
            Ok(value) => Some(Ok(Expression::bool(value))),
            Err(err) => Some(Err(err)),
        }
    }
}

/// `ENABLED e`: `HOLDS e` conjoined with the fact's conditioned-by clauses,
/// parameter-substituted with `e`'s arguments.
struct EnabledProducer {
    operands: Vec<Expression>,
    done: bool,
}

impl Producer for EnabledProducer {
    fn next(&mut self, ctx: &Context<'_>) -> StreamItem {
        if self.done {
            return None;
        }
        self.done = true;
        Some(self.evaluate(ctx))
    }
}

impl EnabledProducer {
    fn evaluate(&self, ctx: &Context<'_>) -> Result<Expression, EvalError> {
        let operand = self
            .operands
            .first()
            .ok_or(EvalError::MissingOperand { op: "ENABLED" })?;
        let (identifier, arguments) = operand
            .as_constructor()
            .ok_or(EvalError::HoldsOnLiteral)?;
        let fact = ctx
            .registry
            .get(identifier)
            .ok_or_else(|| TypeError::UnknownFact(identifier.to_string()))?;

        let mut conjuncts = vec![Expression::operator(
            Operator::Holds,
            vec![operand.clone()],
        )];
        match fact {
            Fact::Atomic(atomic) => {
                let params = vec![atomic.name.clone()];
                let values = vec![operand.clone()];
                for condition in &atomic.conditioned_by {
                    conjuncts.push(fill_parameters(ctx.registry, condition, &params, &values)?);
                }
            }
            Fact::Composite(composite) => {
                for condition in &composite.conditioned_by {
                    conjuncts.push(fill_parameters(
                        ctx.registry,
                        condition,
                        &composite.identified_by,
                        arguments,
                    )?);
                }
            }
        }

        let assembled = Expression::operator(Operator::And, conjuncts);
        let binding = match producer_for(assembled).next(ctx) {
            None => return Ok(Expression::bool(false)),
            Some(item) => item?,
        };
        Ok(Expression::bool(truth(ctx, &binding)?))
    }
}

/// `Foreach`: streams every binding of the body.
struct ForeachProducer {
    body: Option<Expression>,
    inner: Option<Box<dyn Producer>>,
}

impl Producer for ForeachProducer {
    fn next(&mut self, ctx: &Context<'_>) -> StreamItem {
        if self.inner.is_none() {
            let body = self.body.take()?;
            match expand(ctx.registry, &body) {
                Ok(expanded) => self.inner = Some(producer_for(expanded)),
                Err(err) => return Some(Err(err)),
            }
        }
        self.inner.as_mut()?.next(ctx)
    }
}

/// `Exists`: true on the first body binding that holds, false once the
/// body is exhausted. Stops pulling (and releases the body stream) as soon
/// as the answer is known.
struct ExistsProducer {
    body: Option<Expression>,
    inner: Option<Box<dyn Producer>>,
    done: bool,
}

impl Producer for ExistsProducer {
    fn next(&mut self, ctx: &Context<'_>) -> StreamItem {
        if self.done {
            return None;
        }
        if self.inner.is_none() {
            let body = self.body.take()?;
            match expand(ctx.registry, &body) {
                Ok(expanded) => self.inner = Some(producer_for(expanded)),
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
        loop {
            match self.inner.as_mut()?.next(ctx) {
                None => {
                    self.done = true;
                    return Some(Ok(Expression::bool(false)));
                }
                Some(Err(err)) => {
                    self.done = true;
                    return Some(Err(err));
                }
                Some(Ok(binding)) => match truth(ctx, &binding) {
                    Ok(true) => {
                        self.done = true;
                        self.inner = None;
                        return Some(Ok(Expression::bool(true)));
                    }
                    Ok(false) => {}
                    Err(err) => {
                        self.done = true;
                        return Some(Err(err));
                    }
                },
            }
        }
    }
}

/// `e.parameter`: selects the named field of every composite binding.
struct ProjectionProducer {
    parameter: String,
    operand: Option<Expression>,
    inner: Option<Box<dyn Producer>>,
    done: bool,
}

impl Producer for ProjectionProducer {
    fn next(&mut self, ctx: &Context<'_>) -> StreamItem {
        if self.done {
            return None;
        }
        if self.inner.is_none() {
            let operand = self.operand.take()?;
            match expand(ctx.registry, &operand) {
                Ok(expanded) => self.inner = Some(producer_for(expanded)),
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
        let binding = match self.inner.as_mut()?.next(ctx) {
            None => return None,
            Some(Err(err)) => {
                self.done = true;
                return Some(Err(err));
            }
            Some(Ok(binding)) => binding,
        };
        let Some((identifier, operands)) = binding.as_constructor() else {
            self.done = true;
            return Some(Err(EvalError::ProjectNonInstance(binding.to_string())));
        };
        let Some(fact) = ctx.registry.get(identifier) else {
            self.done = true;
            return Some(Err(TypeError::UnknownFact(identifier.to_string()).into()));
        };
        let Some(composite) = fact.as_composite() else {
            self.done = true;
            return Some(Err(EvalError::ProjectAtomic(identifier.to_string())));
        };
        let selected = composite
            .identified_by
            .iter()
            .position(|param| *param == self.parameter)
            .and_then(|position| operands.get(position));
        match selected {
            Some(operand) => Some(Ok(operand.clone())),
            None => {
                self.done = true;
                Some(Err(EvalError::UnknownParameter(self.parameter.clone())))
            }
        }
    }
}
