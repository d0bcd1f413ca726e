//! Extraction of task functions from a parsed source file.
//!
//! Everything here works on the `syn` AST. Directive comments do not
//! survive parsing, so they are handled separately by
//! [`imports`](super::imports).

use std::collections::BTreeSet;
use std::path::Path;

use syn::{Expr, FnArg, Item, Lit, Pat, ReturnType, Type, Visibility};

use crate::error::AnalysisError;
use crate::rt::ArgKind;

use super::{Argument, TaskFunction};

/// Name of the package-level const selecting the fallback target.
const DEFAULT_CONST: &str = "DEFAULT";

/// Name of the package-level const declaring alias mappings.
const ALIASES_CONST: &str = "ALIASES";

/// What one file contributes before cross-file merging.
#[derive(Debug, Default)]
pub struct ParsedFile {
    /// First line of the file-level doc comment, if any.
    pub description: Option<String>,
    /// Task functions declared in the file.
    pub functions: Vec<TaskFunction>,
    /// Value of the `DEFAULT` const, if declared.
    pub default: Option<String>,
    /// Pairs from the `ALIASES` const, if declared.
    pub aliases: Vec<(String, String)>,
}

/// Parse one task file and extract its contribution.
///
/// # Errors
///
/// Fails on a syntax error or a degenerate signature (second context
/// parameter, multiple return values, unsupported argument type after the
/// signature was accepted). Merely ineligible functions are skipped.
pub fn parse_task_file(path: &Path, content: &str) -> Result<ParsedFile, AnalysisError> {
    let ast = syn::parse_file(content).map_err(|err| AnalysisError::Parse {
        file: path.to_path_buf(),
        message: err.to_string(),
    })?;

    let mut parsed = ParsedFile {
        description: doc_first_line(&ast.attrs),
        ..ParsedFile::default()
    };

    // Namespaces may be declared after their impl blocks; collect them first.
    let namespaces = namespace_idents(&ast.items);

    for item in &ast.items {
        match item {
            Item::Fn(function) => {
                if !is_public(&function.vis) {
                    continue;
                }
                if let Some(task) =
                    extract_function(path, &function.sig, &function.attrs, "")?
                {
                    parsed.functions.push(task);
                }
            }
            Item::Impl(block) if block.trait_.is_none() => {
                let Some(receiver) = self_type_ident(&block.self_ty) else {
                    continue;
                };
                if !namespaces.contains(&receiver) {
                    continue;
                }
                for impl_item in &block.items {
                    let syn::ImplItem::Fn(method) = impl_item else {
                        continue;
                    };
                    if !is_public(&method.vis) {
                        continue;
                    }
                    if let Some(task) =
                        extract_function(path, &method.sig, &method.attrs, &receiver)?
                    {
                        parsed.functions.push(task);
                    }
                }
            }
            Item::Const(constant) => {
                if constant.ident == DEFAULT_CONST {
                    parsed.default = string_literal(&constant.expr);
                } else if constant.ident == ALIASES_CONST {
                    parsed.aliases = alias_pairs(&constant.expr);
                }
            }
            _ => {}
        }
    }

    Ok(parsed)
}

/// Unit structs implementing the `Namespace` marker trait.
fn namespace_idents(items: &[Item]) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for item in items {
        let Item::Impl(block) = item else { continue };
        let Some((_, trait_path, _)) = &block.trait_ else {
            continue;
        };
        let Some(last) = trait_path.segments.last() else {
            continue;
        };
        if last.ident != "Namespace" {
            continue;
        }
        if let Some(ident) = self_type_ident(&block.self_ty) {
            out.insert(ident);
        }
    }
    out
}

/// How one parameter type classifies against the closed set.
enum ParamClass {
    Context,
    Arg(ArgKind),
    Unsupported,
}

fn classify_param(ty: &Type) -> ParamClass {
    match ty {
        Type::Reference(reference) => {
            if let Type::Path(path) = reference.elem.as_ref() {
                if path_ends_with(&path.path, "Context") {
                    return ParamClass::Context;
                }
            }
            ParamClass::Unsupported
        }
        Type::Path(path) => {
            let Some(last) = path.path.segments.last() else {
                return ParamClass::Unsupported;
            };
            match last.ident.to_string().as_str() {
                "String" => ParamClass::Arg(ArgKind::String),
                "i64" => ParamClass::Arg(ArgKind::Int),
                "f64" => ParamClass::Arg(ArgKind::Float),
                "bool" => ParamClass::Arg(ArgKind::Bool),
                "Duration" => ParamClass::Arg(ArgKind::Duration),
                _ => ParamClass::Unsupported,
            }
        }
        _ => ParamClass::Unsupported,
    }
}

/// Extract a task function from a signature, or `None` when the function is
/// merely ineligible.
fn extract_function(
    path: &Path,
    sig: &syn::Signature,
    attrs: &[syn::Attribute],
    receiver: &str,
) -> Result<Option<TaskFunction>, AnalysisError> {
    if sig.asyncness.is_some()
        || sig.unsafety.is_some()
        || sig.abi.is_some()
        || !sig.generics.params.is_empty()
        || sig.variadic.is_some()
    {
        return Ok(None);
    }
    let name = sig.ident.to_string();

    let mut takes_context = false;
    let mut arguments: Vec<Argument> = Vec::new();
    for (index, input) in sig.inputs.iter().enumerate() {
        let typed = match input {
            // Methods taking self are not invocable by name.
            FnArg::Receiver(_) => return Ok(None),
            FnArg::Typed(typed) => typed,
        };
        let param_name = match typed.pat.as_ref() {
            Pat::Ident(ident) => ident.ident.to_string(),
            _ => format!("arg{index}"),
        };
        match classify_param(&typed.ty) {
            ParamClass::Context => {
                if takes_context || index > 0 {
                    return Err(AnalysisError::TooManyContexts {
                        function: name,
                        file: path.to_path_buf(),
                    });
                }
                takes_context = true;
            }
            ParamClass::Arg(kind) => arguments.push(Argument {
                name: param_name,
                kind,
            }),
            ParamClass::Unsupported => {
                // The first positional argument being unsupported makes the
                // function a non-task; a later one is a declaration error.
                if arguments.is_empty() {
                    return Ok(None);
                }
                return Err(AnalysisError::UnsupportedArgument {
                    function: name,
                    file: path.to_path_buf(),
                    argument: param_name,
                });
            }
        }
    }

    let returns_error = match classify_return(&sig.output) {
        ReturnClass::None => false,
        ReturnClass::Error => true,
        ReturnClass::Other => return Ok(None),
        ReturnClass::TooMany => {
            return Err(AnalysisError::TooManyReturns {
                function: name,
                file: path.to_path_buf(),
            });
        }
    };

    Ok(Some(TaskFunction {
        name,
        receiver: receiver.to_string(),
        package_alias: String::new(),
        import_path: String::new(),
        takes_context,
        returns_error,
        arguments,
        is_default: false,
        documentation: doc_first_line(attrs).unwrap_or_default(),
        file: path.to_path_buf(),
    }))
}

enum ReturnClass {
    None,
    Error,
    Other,
    TooMany,
}

fn classify_return(output: &ReturnType) -> ReturnClass {
    let ReturnType::Type(_, ty) = output else {
        return ReturnClass::None;
    };
    match ty.as_ref() {
        Type::Tuple(tuple) if tuple.elems.is_empty() => ReturnClass::None,
        Type::Tuple(_) => ReturnClass::TooMany,
        Type::Path(path) => {
            let Some(last) = path.path.segments.last() else {
                return ReturnClass::Other;
            };
            if last.ident == "TaskResult" {
                return ReturnClass::Error;
            }
            if last.ident != "Result" {
                return ReturnClass::Other;
            }
            // Result<(), E> and unparameterised Result aliases report
            // failure; a value-carrying Result is two returns in disguise.
            match &last.arguments {
                syn::PathArguments::None => ReturnClass::Error,
                syn::PathArguments::AngleBracketed(args) => {
                    match args.args.first() {
                        Some(syn::GenericArgument::Type(Type::Tuple(t)))
                            if t.elems.is_empty() =>
                        {
                            ReturnClass::Error
                        }
                        Some(_) => ReturnClass::TooMany,
                        None => ReturnClass::Error,
                    }
                }
                syn::PathArguments::Parenthesized(_) => ReturnClass::Other,
            }
        }
        _ => ReturnClass::Other,
    }
}

fn is_public(vis: &Visibility) -> bool {
    matches!(vis, Visibility::Public(_))
}

fn self_type_ident(ty: &Type) -> Option<String> {
    match ty {
        Type::Path(path) => path.path.segments.last().map(|s| s.ident.to_string()),
        _ => None,
    }
}

fn path_ends_with(path: &syn::Path, ident: &str) -> bool {
    path.segments.last().is_some_and(|s| s.ident == ident)
}

/// First line of a doc comment from `#[doc = "..."]` attributes.
fn doc_first_line(attrs: &[syn::Attribute]) -> Option<String> {
    for attr in attrs {
        if !attr.path().is_ident("doc") {
            continue;
        }
        let syn::Meta::NameValue(nv) = &attr.meta else {
            continue;
        };
        let Expr::Lit(lit) = &nv.value else { continue };
        let Lit::Str(text) = &lit.lit else { continue };
        let line = text.value().trim().to_string();
        if !line.is_empty() {
            return Some(line);
        }
    }
    None
}

/// The string value of a `pub const NAME: &str = "...";` expression.
fn string_literal(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Lit(lit) => match &lit.lit {
            Lit::Str(text) => Some(text.value()),
            _ => None,
        },
        Expr::Reference(reference) => string_literal(&reference.expr),
        _ => None,
    }
}

/// Pairs from a `pub const ALIASES: &[(&str, &str)] = &[("b", "build")];`
/// expression.
fn alias_pairs(expr: &Expr) -> Vec<(String, String)> {
    let array = match expr {
        Expr::Reference(reference) => match reference.expr.as_ref() {
            Expr::Array(array) => array,
            _ => return Vec::new(),
        },
        Expr::Array(array) => array,
        _ => return Vec::new(),
    };
    let mut out = Vec::new();
    for element in &array.elems {
        let Expr::Tuple(tuple) = element else { continue };
        if tuple.elems.len() != 2 {
            continue;
        }
        let pair: Vec<Option<String>> = tuple.elems.iter().map(string_literal).collect();
        if let (Some(Some(alias)), Some(Some(target))) = (pair.first().cloned(), pair.get(1).cloned())
        {
            out.push((alias, target));
        }
    }
    out
}
