//! Procedural macros for oauth_loopback
//!
//! This crate provides procedural macros for the oauth_loopback plugin:
//! - `command_permissions!`: generates the allow/deny permission table for a
//!   set of plugin commands
//!
//! These macros are re-exported by the main `oauth_loopback` crate and should
//! typically be used through that interface.
//!
//! # Examples
//!
//! ```ignore
//! use oauth_loopback::permissions::PermissionDescriptor;
//!
//! static TABLE: &[PermissionDescriptor] =
//!     oauth_loopback::command_permissions!(namespace = "oauth", commands = [cancel, start]);
//!
//! assert_eq!(TABLE[0].identifier, "oauth:allow-cancel");
//! assert_eq!(TABLE[1].identifier, "oauth:deny-cancel");
//! ```

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse::Parser, punctuated::Punctuated, Expr, ExprLit, Ident, Lit, Meta, Token};

/// Arguments parsed from `command_permissions!(...)`
struct PermissionArgs {
    namespace: String,
    commands: Vec<Ident>,
}

impl PermissionArgs {
    /// Parse arguments from the macro token stream
    fn parse(input: TokenStream2) -> syn::Result<Self> {
        let mut namespace = None;
        let mut commands = None;

        let parser = Punctuated::<Meta, Token![,]>::parse_terminated;
        let metas = parser.parse2(input.clone())?;

        for meta in metas {
            let nv = match meta {
                Meta::NameValue(nv) => nv,
                other => {
                    return Err(syn::Error::new_spanned(
                        &other,
                        "Expected key = value format",
                    ));
                }
            };

            let key = nv
                .path
                .get_ident()
                .ok_or_else(|| syn::Error::new_spanned(&nv.path, "Expected simple identifier"))?
                .to_string();

            match key.as_str() {
                "namespace" => {
                    let Expr::Lit(ExprLit {
                        lit: Lit::Str(lit), ..
                    }) = &nv.value
                    else {
                        return Err(syn::Error::new_spanned(
                            &nv.value,
                            "Expected string literal for namespace",
                        ));
                    };
                    validate_namespace(&lit.value()).map_err(|msg| syn::Error::new_spanned(lit, msg))?;
                    namespace = Some(lit.value());
                }
                "commands" => {
                    let Expr::Array(array) = &nv.value else {
                        return Err(syn::Error::new_spanned(
                            &nv.value,
                            "Expected a list of command names, e.g. [start, cancel]",
                        ));
                    };

                    let mut parsed: Vec<Ident> = Vec::new();
                    for elem in &array.elems {
                        let ident = match elem {
                            Expr::Path(path) => path.path.get_ident().cloned(),
                            _ => None,
                        }
                        .ok_or_else(|| {
                            syn::Error::new_spanned(elem, "Expected a bare command identifier")
                        })?;

                        if parsed.iter().any(|existing| existing == &ident) {
                            return Err(syn::Error::new_spanned(
                                &ident,
                                format!("Duplicate command '{}'", ident),
                            ));
                        }
                        parsed.push(ident);
                    }

                    if parsed.is_empty() {
                        return Err(syn::Error::new_spanned(
                            array,
                            "At least one command is required",
                        ));
                    }
                    commands = Some(parsed);
                }
                _ => {
                    return Err(syn::Error::new_spanned(
                        &nv.path,
                        format!("Unknown argument '{}'", key),
                    ));
                }
            }
        }

        let namespace = namespace
            .ok_or_else(|| syn::Error::new_spanned(&input, "Missing `namespace = \"...\"`"))?;
        let commands = commands
            .ok_or_else(|| syn::Error::new_spanned(&input, "Missing `commands = [...]`"))?;

        Ok(Self {
            namespace,
            commands,
        })
    }
}

/// Namespaces are lowercase ASCII words, optionally dash-separated
fn validate_namespace(namespace: &str) -> Result<(), String> {
    if namespace.is_empty() {
        return Err("Namespace must not be empty".to_string());
    }
    if namespace.starts_with('-') || namespace.ends_with('-') {
        return Err(format!("Namespace '{}' must not start or end with '-'", namespace));
    }
    if !namespace
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(format!(
            "Namespace '{}' must contain only lowercase letters, digits and '-'",
            namespace
        ));
    }
    Ok(())
}

/// Command identifiers use dashes in permission names: `set_scope` -> `set-scope`
fn command_name(ident: &Ident) -> String {
    ident.to_string().trim_start_matches("r#").replace('_', "-")
}

/// Generate the allow + deny descriptor pair for a single command
fn generate_pair(namespace: &str, command: &Ident) -> TokenStream2 {
    let name = command_name(command);

    let allow_id = format!("{}:allow-{}", namespace, name);
    let allow_desc = format!(
        "Enables the {} command without any pre-configured scope.",
        name
    );
    let deny_id = format!("{}:deny-{}", namespace, name);
    let deny_desc = format!(
        "Denies the {} command without any pre-configured scope.",
        name
    );

    quote! {
        oauth_loopback::permissions::PermissionDescriptor::new(#allow_id, #allow_desc),
        oauth_loopback::permissions::PermissionDescriptor::new(#deny_id, #deny_desc),
    }
}

/// Function-like macro generating a static permission table
///
/// For each command, in the order given, the table holds an `allow-` entry
/// followed by a `deny-` entry. Underscores in command names become dashes.
///
/// # Arguments
///
/// * `namespace` - Plugin namespace prefix (e.g. `"oauth"`)
/// * `commands` - Bracketed list of command identifiers
///
/// # Example
///
/// ```ignore
/// use oauth_loopback::permissions::PermissionDescriptor;
///
/// let table: &'static [PermissionDescriptor] =
///     oauth_loopback::command_permissions!(namespace = "oauth", commands = [start]);
///
/// assert_eq!(table.len(), 2);
/// assert_eq!(table[0].identifier, "oauth:allow-start");
/// assert_eq!(
///     table[1].description,
///     "Denies the start command without any pre-configured scope."
/// );
/// ```
#[proc_macro]
pub fn command_permissions(input: TokenStream) -> TokenStream {
    match expand_command_permissions(input.into()) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

/// Core expansion logic for the command_permissions macro
fn expand_command_permissions(input: TokenStream2) -> syn::Result<TokenStream2> {
    let args = PermissionArgs::parse(input)?;

    let pairs = args
        .commands
        .iter()
        .map(|command| generate_pair(&args.namespace, command));

    // The const item keeps the table 'static in both const and fn contexts.
    Ok(quote! {
        {
            const PERMISSIONS: &[oauth_loopback::permissions::PermissionDescriptor] = &[
                #(#pairs)*
            ];
            PERMISSIONS
        }
    })
}
