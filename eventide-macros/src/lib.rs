// These lints are triggered by darling's generated code for
// `#[darling(default)]`.
#![allow(clippy::option_if_let_else)]
#![allow(clippy::needless_continue)]

use darling::{
    FromDeriveInput, FromField,
    ast::Data,
    util::{Ignored, PathList},
};
use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{DeriveInput, Ident, parse_macro_input};

/// A field of the deriving struct; only `#[aggregate(state)]` matters.
#[derive(Debug, FromField)]
#[darling(attributes(aggregate))]
struct AggregateField {
    ident: Option<Ident>,
    #[darling(default)]
    state: bool,
}

/// Configuration for the `#[aggregate(...)]` attribute.
#[derive(Debug, FromDeriveInput)]
#[darling(attributes(aggregate), supports(struct_named))]
struct AggregateArgs {
    ident: Ident,
    data: Data<Ignored, AggregateField>,
    events: PathList,
    /// Capability traits handled through `Handle<dyn Trait>`.
    #[darling(default)]
    capabilities: PathList,
}

/// Parse derive input with darling and render errors as tokens.
fn parse_or_error<T, F>(input: &DeriveInput, f: F) -> TokenStream2
where
    T: FromDeriveInput,
    F: FnOnce(T) -> TokenStream2,
{
    match T::from_derive_input(input) {
        Ok(args) => f(args),
        Err(err) => err.write_errors(),
    }
}

/// Find the single `#[aggregate(state)]` field.
fn state_field(args: &AggregateArgs) -> darling::Result<&Ident> {
    let fields = args
        .data
        .as_ref()
        .take_struct()
        .ok_or_else(|| darling::Error::unsupported_shape("enum").with_span(&args.ident))?;

    let mut marked = fields.fields.into_iter().filter(|field| field.state);
    let Some(first) = marked.next() else {
        return Err(darling::Error::custom(
            "one field must be marked `#[aggregate(state)]` and hold the `AggregateState`",
        )
        .with_span(&args.ident));
    };
    if let Some(second) = marked.next() {
        let span = second.ident.as_ref().unwrap_or(&args.ident);
        return Err(
            darling::Error::custom("only one field may be marked `#[aggregate(state)]`")
                .with_span(span),
        );
    }
    first
        .ident
        .as_ref()
        .ok_or_else(|| darling::Error::unsupported_shape("tuple struct").with_span(&args.ident))
}

/// Derives the `Aggregate` trait for a struct.
///
/// This macro generates:
/// - `register`, routing each listed event to its `Handle<E>` implementation
///   and each listed capability trait to its `Handle<dyn Trait>`
///   implementation
/// - `register_events`, so serializing stores can decode the listed events
/// - the `state`/`state_mut` accessors for the `#[aggregate(state)]` field
///
/// # Attributes
///
/// ## Required
/// - `events(Type1, Type2, ...)` - Event types with an exact handler
/// - `#[aggregate(state)]` on exactly one field of type `AggregateState`
///
/// ## Optional
/// - `capabilities(Trait1, Trait2, ...)` - Capability traits with a
///   `Handle<dyn Trait>` handler
///
/// # Example
///
/// ```ignore
/// #[derive(Aggregate)]
/// #[aggregate(events(FundsDeposited, FundsWithdrawn), capabilities(Audited))]
/// pub struct Account {
///     #[aggregate(state)]
///     state: AggregateState,
///     balance: i64,
/// }
/// ```
#[proc_macro_derive(Aggregate, attributes(aggregate))]
pub fn derive_aggregate(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    derive_aggregate_impl(&input).into()
}

/// Internal entry point that returns tokens for the aggregate derive.
fn derive_aggregate_impl(input: &DeriveInput) -> TokenStream2 {
    parse_or_error::<AggregateArgs, _>(input, |args| generate_aggregate_impl(&args, input))
}

/// Generate the aggregate derive implementation tokens.
fn generate_aggregate_impl(args: &AggregateArgs, input: &DeriveInput) -> TokenStream2 {
    if args.events.is_empty() {
        return darling::Error::custom("events(...) must contain at least one event type")
            .with_span(&args.ident)
            .write_errors();
    }
    let state = match state_field(args) {
        Ok(state) => state,
        Err(err) => return err.write_errors(),
    };

    let struct_name = &args.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let events = args.events.iter();
    let registered_events = args.events.iter();
    let capabilities = args.capabilities.iter();

    quote! {
        impl #impl_generics ::eventide::Aggregate for #struct_name #ty_generics #where_clause {
            fn register(handlers: &mut ::eventide::dispatch::Handlers<Self>) {
                handlers
                    #(.event::<#events>())*
                    #(.capability::<dyn #capabilities>())*;
            }

            fn register_events(registry: &mut ::eventide::event::EventRegistry) {
                registry #(.register::<#registered_events>())*;
            }

            fn state(&self) -> &::eventide::AggregateState {
                &self.#state
            }

            fn state_mut(&mut self) -> &mut ::eventide::AggregateState {
                &mut self.#state
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use syn::parse_quote;

    use super::*;

    /// Normalise token output by removing whitespace.
    fn compact(tokens: &TokenStream2) -> String {
        tokens
            .to_string()
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect()
    }

    #[test]
    /// Confirms handlers, registry and accessors are generated.
    fn generate_aggregate_impl_wires_events_and_state() {
        let input: DeriveInput = parse_quote! {
            #[aggregate(events(FundsDeposited, FundsWithdrawn))]
            pub struct Account {
                #[aggregate(state)]
                state: AggregateState,
                balance: i64,
            }
        };

        let compact = compact(&derive_aggregate_impl(&input));

        assert!(compact.contains("impl::eventide::AggregateforAccount"));
        assert!(compact.contains(".event::<FundsDeposited>().event::<FundsWithdrawn>()"));
        assert!(compact.contains("registry.register::<FundsDeposited>()"));
        assert!(compact.contains("&self.state"));
        assert!(compact.contains("&mutself.state"));
    }

    #[test]
    /// Confirms capability traits are registered as trait objects.
    fn generate_aggregate_impl_registers_capabilities() {
        let input: DeriveInput = parse_quote! {
            #[aggregate(events(Opened), capabilities(Audited, billing::Billable))]
            pub struct Ledger {
                #[aggregate(state)]
                inner: AggregateState,
            }
        };

        let compact = compact(&derive_aggregate_impl(&input));

        assert!(compact.contains(".capability::<dynAudited>()"));
        assert!(compact.contains(".capability::<dynbilling::Billable>()"));
        assert!(compact.contains("&self.inner"));
    }

    #[test]
    /// Ensures empty event lists yield a compile-time error.
    fn generate_aggregate_impl_emits_error_on_empty_events_list() {
        let input: DeriveInput = parse_quote! {
            #[aggregate(events())]
            pub struct Account {
                #[aggregate(state)]
                state: AggregateState,
            }
        };

        let compact = compact(&derive_aggregate_impl(&input));

        assert!(compact.contains("events(...)mustcontainatleastoneeventtype"));
    }

    #[test]
    /// Ensures the state field is required and unique.
    fn generate_aggregate_impl_checks_the_state_field() {
        let missing: DeriveInput = parse_quote! {
            #[aggregate(events(Opened))]
            pub struct Account {
                state: AggregateState,
            }
        };
        assert!(compact(&derive_aggregate_impl(&missing)).contains("mustbemarked"));

        let duplicated: DeriveInput = parse_quote! {
            #[aggregate(events(Opened))]
            pub struct Account {
                #[aggregate(state)]
                a: AggregateState,
                #[aggregate(state)]
                b: AggregateState,
            }
        };
        assert!(compact(&derive_aggregate_impl(&duplicated)).contains("onlyonefield"));
    }
}
