// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Test attributes for igmp-bridge tests that touch real sockets.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, ItemFn};

/// Skip the test body unless the process runs with an effective uid of 0.
///
/// Capture sockets (AF_PACKET) and multicast membership on arbitrary
/// interfaces need CAP_NET_RAW. Unprivileged runs print a notice and return
/// early instead of failing, so the attribute composes with `#[ignore]`:
///
/// ```ignore
/// #[test]
/// #[ignore]
/// #[requires_root]
/// fn joins_all_routers_on_loopback() {
///     // runs only under `sudo -E cargo test -- --ignored`
/// }
/// ```
///
/// The annotated function must return `()`.
#[proc_macro_attribute]
pub fn requires_root(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);

    let attrs = &input.attrs;
    let vis = &input.vis;
    let sig = &input.sig;
    let block = &input.block;
    let name = sig.ident.to_string();

    let output = quote! {
        #(#attrs)*
        #vis #sig {
            if !nix::unistd::geteuid().is_root() {
                eprintln!("skipping {}: needs root (sudo -E cargo test -- --ignored)", #name);
                return;
            }

            #block
        }
    };

    output.into()
}
