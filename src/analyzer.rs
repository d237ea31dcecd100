//! Scope analysis for editor tooling: what is visible at a given offset of a script.

#[cfg(feature = "serde")]
use serde::Serialize;

use crate::ast::*;

/// A local variable and the offset of its declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct VariableInfo {
    pub name: String,
    pub declared_at: usize,
}

/// Everything one lexical scope defines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct AnalyzedScope {
    pub range: Range,
    pub variables: Vec<VariableInfo>,
    pub statics: Vec<String>,
    pub attributes: Vec<String>,
    pub methods: Vec<String>,
    pub functions: Vec<String>,
    pub modules: Vec<String>,
}

/// Names visible at one position, innermost scope last.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct ScopeSnapshot {
    pub position: usize,
    pub variables: Vec<String>,
    pub statics: Vec<String>,
    pub attributes: Vec<String>,
    pub methods: Vec<String>,
    pub functions: Vec<String>,
    pub modules: Vec<String>,
}

fn push_unique(list: &mut Vec<String>, name: &str) {
    if !list.iter().any(|x| x == name) {
        list.push(name.to_owned());
    }
}

fn join_path(path: &[Identifier]) -> String {
    path.iter().map(|x| x.name.as_str()).collect::<Vec<_>>().join("::")
}

#[derive(Debug, Default)]
pub struct Analyzer {
    scopes: Vec<AnalyzedScope>,
    diagnostics: Vec<Diagnostic>,
    open: Vec<usize>,
}

impl Analyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walks `script`, replacing the results of any previous pass.
    pub fn analyze(&mut self, script: &Script, diagnostics: Vec<Diagnostic>) {
        self.scopes.clear();
        self.open.clear();
        self.diagnostics = diagnostics;

        let mut root = script.range;
        if root == Range::default() {
            root.end = usize::MAX;
        }
        self.enter(root);
        self.statements(&script.body);
        self.open.pop();
    }

    pub fn scopes(&self) -> &[AnalyzedScope] {
        &self.scopes
    }
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Collects every name in scope at `position`. Variables only count once declared.
    pub fn get_scopes_at(&self, position: usize) -> ScopeSnapshot {
        let mut res = ScopeSnapshot { position, ..Default::default() };
        for scope in self.scopes.iter().filter(|x| x.range.contains(position)) {
            for var in scope.variables.iter().filter(|x| x.declared_at <= position) {
                push_unique(&mut res.variables, &var.name);
            }
            scope.statics.iter().for_each(|x| push_unique(&mut res.statics, x));
            scope.attributes.iter().for_each(|x| push_unique(&mut res.attributes, x));
            scope.methods.iter().for_each(|x| push_unique(&mut res.methods, x));
            scope.functions.iter().for_each(|x| push_unique(&mut res.functions, x));
            scope.modules.iter().for_each(|x| push_unique(&mut res.modules, x));
        }
        res
    }

    fn enter(&mut self, range: Range) {
        self.scopes.push(AnalyzedScope { range, ..Default::default() });
        self.open.push(self.scopes.len() - 1);
    }
    fn scoped(&mut self, range: Range, f: impl FnOnce(&mut Self)) {
        self.enter(range);
        f(self);
        self.open.pop();
    }
    fn current(&mut self) -> Option<&mut AnalyzedScope> {
        let index = *self.open.last()?;
        self.scopes.get_mut(index)
    }

    fn statements(&mut self, statements: &[Statement]) {
        statements.iter().for_each(|x| self.statement(x));
    }

    fn statement(&mut self, statement: &Statement) {
        let range = statement.range;
        match &statement.kind {
            StatementKind::Expression(expr) | StatementKind::Throw(expr) | StatementKind::Require(expr) => self.expression(expr),
            StatementKind::Variable(declarators) => {
                for declarator in declarators {
                    if let Some(init) = &declarator.init {
                        self.expression(init);
                    }
                    self.declare(&declarator.target, range.start);
                }
            }
            StatementKind::Static { name, value } => {
                if let Some(value) = value {
                    self.expression(value);
                }
                if let Some(scope) = self.current() {
                    push_unique(&mut scope.statics, &name.name);
                }
            }
            StatementKind::Attribute { name, value } => {
                if let Some(value) = value {
                    self.expression(value);
                }
                if let Some(scope) = self.current() {
                    push_unique(&mut scope.attributes, &name.name);
                }
            }
            StatementKind::Block(body) => self.scoped(range, |a| a.statements(body)),
            StatementKind::If { test, consequent, alternate } => {
                self.expression(test);
                self.scoped(range, |a| {
                    a.statement(consequent);
                    if let Some(alternate) = alternate {
                        a.statement(alternate);
                    }
                });
            }
            StatementKind::While { test, body } | StatementKind::DoWhile { body, test } => {
                self.scoped(range, |a| {
                    a.expression(test);
                    a.statement(body);
                });
            }
            StatementKind::For { init, test, update, body } => {
                self.scoped(range, |a| {
                    if let Some(init) = init {
                        a.statement(init);
                    }
                    test.iter().chain(update).for_each(|x| a.expression(x));
                    a.statement(body);
                });
            }
            StatementKind::Foreach { target, iterable, body } => {
                self.expression(iterable);
                self.scoped(range, |a| {
                    a.declare(target, range.start);
                    a.statement(body);
                });
            }
            StatementKind::Switch { discriminant, cases } => {
                self.expression(discriminant);
                self.scoped(range, |a| {
                    for case in cases {
                        if let Some(test) = &case.test {
                            a.expression(test);
                        }
                        a.statements(&case.body);
                    }
                });
            }
            StatementKind::Return(expr) => {
                if let Some(expr) = expr {
                    self.expression(expr);
                }
            }
            StatementKind::Function(sub) | StatementKind::Method(sub) => {
                if let (Some(name), Some(scope)) = (&sub.name, self.current()) {
                    let list = match statement.kind {
                        StatementKind::Method(_) => &mut scope.methods,
                        _ => &mut scope.functions,
                    };
                    push_unique(list, &name.name);
                }
                self.subroutine(sub);
            }
            StatementKind::Module { path, body } => {
                let name = join_path(path);
                if let Some(scope) = self.current() {
                    push_unique(&mut scope.modules, &name);
                }
                self.scoped(range, |a| a.statements(body));
            }
            StatementKind::Class { name, body, .. } => {
                if let Some(scope) = self.current() {
                    push_unique(&mut scope.modules, &name.name);
                }
                self.scoped(range, |a| a.statements(body));
            }
            StatementKind::Import { target, alias, .. } => {
                let name = alias.as_ref().unwrap_or(target);
                if name.name != "*" {
                    if let Some(scope) = self.current() {
                        push_unique(&mut scope.statics, &name.name);
                    }
                }
            }
            StatementKind::Try { block, param, handler } => {
                self.scoped(range, |a| a.statements(block));
                if let Some(handler) = handler {
                    self.scoped(range, |a| {
                        if let (Some(param), Some(scope)) = (param, a.current()) {
                            scope.variables.push(VariableInfo { name: param.name.clone(), declared_at: param.range.start });
                        }
                        a.statements(handler);
                    });
                }
            }
            StatementKind::Print(exprs) => exprs.iter().for_each(|x| self.expression(x)),
            StatementKind::ModuleConstructor { target, body } => {
                self.expression(target);
                self.scoped(range, |a| a.statements(body));
            }
            StatementKind::Undef(_) | StatementKind::SourceFile(_) | StatementKind::Break | StatementKind::Continue | StatementKind::Empty => (),
        }
    }

    fn declare(&mut self, target: &Pattern, at: usize) {
        let names: Vec<&Identifier> = match target {
            Pattern::Identifier(name) => vec![name],
            Pattern::List { elements, .. } => elements.iter().collect(),
        };
        if let Some(scope) = self.current() {
            for name in names {
                scope.variables.push(VariableInfo { name: name.name.clone(), declared_at: at });
            }
        }
    }

    fn subroutine(&mut self, sub: &Subroutine) {
        self.scoped(sub.range, |a| {
            for param in &sub.params {
                if let Some(default) = &param.default {
                    a.expression(default);
                }
                if let Some(scope) = a.current() {
                    scope.variables.push(VariableInfo { name: param.name.name.clone(), declared_at: sub.range.start });
                }
            }
            match &sub.body {
                SubroutineBody::Block(body) => a.statements(body),
                SubroutineBody::Expression(expr) => a.expression(expr),
            }
        });
    }

    /// Only function literals open scopes inside expressions.
    fn expression(&mut self, expr: &Expression) {
        match &expr.kind {
            ExpressionKind::Function(sub) | ExpressionKind::Method(sub) => self.subroutine(sub),
            ExpressionKind::Template(parts) => {
                for part in parts {
                    if let TemplatePart::Expression(expr) = part {
                        self.expression(expr);
                    }
                }
            }
            ExpressionKind::Binary { left, right, .. } | ExpressionKind::Logical { left, right, .. } => {
                self.expression(left);
                self.expression(right);
            }
            ExpressionKind::Unary { argument, .. } | ExpressionKind::Update { argument, .. } => self.expression(argument),
            ExpressionKind::Assign { target, value, .. } => {
                self.expression(target);
                self.expression(value);
            }
            ExpressionKind::Call { callee, arguments } => {
                self.expression(callee);
                arguments.iter().for_each(|x| self.expression(x));
            }
            ExpressionKind::Member { object, .. } => self.expression(object),
            ExpressionKind::Element { object, index: property } | ExpressionKind::ObjectSelector { object, property } => {
                self.expression(object);
                self.expression(property);
            }
            ExpressionKind::Conditional { test, consequent, alternate } => {
                self.expression(test);
                self.expression(consequent);
                self.expression(alternate);
            }
            ExpressionKind::Array(elements) => elements.iter().for_each(|x| self.expression(x)),
            ExpressionKind::Map(pairs) => {
                for (key, value) in pairs {
                    self.expression(key);
                    self.expression(value);
                }
            }
            _ => (),
        }
    }
}
