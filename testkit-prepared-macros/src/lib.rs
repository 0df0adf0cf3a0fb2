//! Procedural macros for testkit-prepared
//!
//! This crate provides the `#[testkit_prepared::test]` attribute macro, which
//! runs an async test function through the testkit-prepared runner under the
//! built-in `#[test]` harness.
//!
//! # Example
//!
//! ```rust,ignore
//! use testkit_prepared::prelude::*;
//! use std::time::Duration;
//!
//! #[testkit_prepared::test(seed = 42)]
//! async fn waits_a_minute(env: TestEnvironment) {
//!     env.time().delay(Duration::from_secs(60)).await;
//!     assert_eq!(env.time().now(), Duration::from_secs(60));
//! }
//! ```

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{
    parse::{Parse, ParseStream},
    parse_macro_input, FnArg, Ident, ItemFn, Lit, ReturnType, Token,
};

/// Configuration options for the test macro.
#[derive(Default)]
struct TestConfig {
    /// Idle timeout, in milliseconds of virtual time
    idle_timeout_ms: Option<u64>,
    /// Seed of the test's random generator
    seed: Option<u64>,
}

impl Parse for TestConfig {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut config = TestConfig::default();

        while !input.is_empty() {
            let ident: Ident = input.parse()?;
            input.parse::<Token![=]>()?;

            let value = match input.parse::<Lit>()? {
                Lit::Int(int) => int.base10_parse::<u64>()?,
                other => {
                    return Err(syn::Error::new(
                        other.span(),
                        format!("expected an integer for `{ident}`"),
                    ));
                }
            };

            match ident.to_string().as_str() {
                "idle_timeout_ms" => config.idle_timeout_ms = Some(value),
                "seed" => config.seed = Some(value),
                _ => {
                    return Err(syn::Error::new(
                        ident.span(),
                        format!("unknown attribute: {ident}"),
                    ));
                }
            }

            if input.peek(Token![,]) {
                input.parse::<Token![,]>()?;
            }
        }

        Ok(config)
    }
}

/// Runs an async test function with a fresh `TestEnvironment`.
///
/// The function may take no parameter, or a single `TestEnvironment`. It may
/// return `()` or a `Result<(), E>` where `E` converts into a boxed error.
/// The test fails if the body fails or panics, if a finalizer fails, or if
/// foreground work stops making progress for the idle timeout.
///
/// # Configuration Options
///
/// - `idle_timeout_ms = 500` - Idle timeout in milliseconds of virtual time
/// - `seed = 42` - Fixes the seed of the random generator
///
/// ```rust,ignore
/// #[testkit_prepared::test(idle_timeout_ms = 500)]
/// async fn never_finishes(env: TestEnvironment) -> Result<()> {
///     futures::future::pending::<()>().await;
///     Ok(())
/// }
/// ```
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let config = parse_macro_input!(attr as TestConfig);
    let input = parse_macro_input!(item as ItemFn);

    expand_test(&config, &input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand_test(config: &TestConfig, input: &ItemFn) -> syn::Result<TokenStream2> {
    let name = &input.sig.ident;
    let attrs = &input.attrs;
    let vis = &input.vis;

    if input.sig.asyncness.is_none() {
        return Err(syn::Error::new_spanned(
            &input.sig,
            "test function must be async",
        ));
    }
    if let Some(FnArg::Receiver(receiver)) = input.sig.inputs.first() {
        return Err(syn::Error::new_spanned(
            receiver,
            "test function cannot take self",
        ));
    }
    if input.sig.inputs.len() > 1 {
        return Err(syn::Error::new_spanned(
            &input.sig.inputs,
            "test function takes at most one parameter, the TestEnvironment",
        ));
    }

    let body_fn = format_ident!("__testkit_prepared_{}", name);
    let inputs = &input.sig.inputs;
    let output = &input.sig.output;
    let block = &input.block;

    let call = if input.sig.inputs.is_empty() {
        quote! { #body_fn() }
    } else {
        quote! { #body_fn(env) }
    };
    let body = match output {
        ReturnType::Default => quote! {
            |env: ::testkit_prepared::environment::TestEnvironment| async move {
                let _ = &env;
                #call.await;
                ::core::result::Result::Ok::<(), ::testkit_prepared::Error>(())
            }
        },
        ReturnType::Type(..) => quote! {
            |env: ::testkit_prepared::environment::TestEnvironment| {
                let _ = &env;
                #call
            }
        },
    };

    let idle_timeout = config.idle_timeout_ms.map(|millis| {
        quote! {
            let config = config.with(::testkit_prepared::config::IdleTimeout(
                ::std::time::Duration::from_millis(#millis),
            ));
        }
    });
    let seed = config.seed.map(|seed| {
        quote! {
            let config = config.with(::testkit_prepared::config::RandomSeed(#seed));
        }
    });

    Ok(quote! {
        #[::core::prelude::v1::test]
        #(#attrs)*
        #vis fn #name() {
            async fn #body_fn(#inputs) #output #block

            let config = ::testkit_prepared::config::Config::empty();
            #idle_timeout
            #seed
            ::testkit_prepared::runner::run_attributed_test(
                ::core::concat!(::core::module_path!(), "::", ::core::stringify!(#name)),
                config,
                ::testkit_prepared::suite::TestBody::new(#body),
            );
        }
    })
}
