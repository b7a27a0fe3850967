use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Fields, LitInt, LitStr};

/// Derive `Persist` (and `Field`, so the type can nest) for a struct.
///
/// Fields are written in declaration order under their own name. Supported
/// field attributes:
///
/// - `#[persist(skip)]`: never written or read
/// - `#[persist(rename = "key")]`: use `key` in the document
/// - `#[persist(owned)]`: the struct owns the entity (or entities) in this
///   field; their state is written in full next to their id
/// - `#[persist(flatten)]`: write the fields of a nested `Persist` value into
///   the current scope, after this struct's own fields
/// - `#[persist(removed_in = 3)]`: skipped once the schema version is 3 or
///   later
/// - `#[persist(renamed_from = "old")]`: read `old` when the current key is
///   absent (repeatable)
///
/// The generated `Field` impl requires `Default`. Types that are only ever
/// document roots can opt out with `#[persist(root)]`.
///
/// ```ignore
/// #[derive(Persist, Clone, Default)]
/// struct Crate {
///     #[persist(renamed_from = "contents")]
///     items: Vec<String>,
///     #[persist(removed_in = 2)]
///     legacy_weight: f32,
///     lid: Option<Entity>,
/// }
/// ```
#[proc_macro_derive(Persist, attributes(persist))]
pub fn derive_persist(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

#[derive(Default)]
struct StructAttrs {
    root: bool,
}

#[derive(Default)]
struct FieldAttrs {
    skip: bool,
    owned: bool,
    flatten: bool,
    rename: Option<String>,
    removed_in: Option<u32>,
    renamed_from: Vec<String>,
}

fn parse_struct_attrs(input: &DeriveInput) -> syn::Result<StructAttrs> {
    let mut attrs = StructAttrs::default();
    for attr in input.attrs.iter().filter(|a| a.path().is_ident("persist")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("root") {
                attrs.root = true;
                Ok(())
            } else {
                Err(meta.error("unknown persist attribute, expected `root`"))
            }
        })?;
    }
    Ok(attrs)
}

fn parse_field_attrs(field: &syn::Field) -> syn::Result<FieldAttrs> {
    let mut attrs = FieldAttrs::default();
    for attr in field.attrs.iter().filter(|a| a.path().is_ident("persist")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("skip") {
                attrs.skip = true;
            } else if meta.path.is_ident("owned") {
                attrs.owned = true;
            } else if meta.path.is_ident("flatten") {
                attrs.flatten = true;
            } else if meta.path.is_ident("rename") {
                let lit: LitStr = meta.value()?.parse()?;
                attrs.rename = Some(lit.value());
            } else if meta.path.is_ident("removed_in") {
                let lit: LitInt = meta.value()?.parse()?;
                attrs.removed_in = Some(lit.base10_parse()?);
            } else if meta.path.is_ident("renamed_from") {
                let lit: LitStr = meta.value()?.parse()?;
                attrs.renamed_from.push(lit.value());
            } else {
                return Err(meta.error("unknown persist attribute"));
            }
            Ok(())
        })?;
    }

    if attrs.owned && attrs.flatten {
        return Err(syn::Error::new_spanned(
            field,
            "`owned` and `flatten` cannot be combined",
        ));
    }
    if attrs.flatten && (attrs.rename.is_some() || !attrs.renamed_from.is_empty()) {
        return Err(syn::Error::new_spanned(
            field,
            "a flattened field has no key to rename",
        ));
    }
    if attrs.owned && !attrs.renamed_from.is_empty() {
        return Err(syn::Error::new_spanned(
            field,
            "`renamed_from` is not supported on owned fields",
        ));
    }
    Ok(attrs)
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let struct_attrs = parse_struct_attrs(input)?;

    let fields = match &input.data {
        Data::Struct(data) => &data.fields,
        _ => {
            return Err(syn::Error::new_spanned(
                &input.ident,
                "Persist can only be derived for structs",
            ))
        }
    };

    let mut writes = Vec::new();
    let mut reads = Vec::new();
    let mut flatten_writes = Vec::new();
    let mut flatten_reads = Vec::new();

    let members: Vec<(syn::Member, String, &syn::Field)> = match fields {
        Fields::Named(named) => named
            .named
            .iter()
            .filter_map(|f| {
                let ident = f.ident.clone()?;
                let key = ident.to_string();
                Some((syn::Member::Named(ident), key, f))
            })
            .collect(),
        Fields::Unnamed(unnamed) => unnamed
            .unnamed
            .iter()
            .enumerate()
            .map(|(i, f)| (syn::Member::Unnamed(syn::Index::from(i)), i.to_string(), f))
            .collect(),
        Fields::Unit => Vec::new(),
    };

    for (member, default_key, field) in members {
        let attrs = parse_field_attrs(field)?;
        if attrs.skip {
            continue;
        }
        let key = attrs.rename.clone().unwrap_or(default_key);

        let (write, read) = if attrs.flatten {
            (
                quote! { redlilium_persist::Persist::serialize_fields(&self.#member, ctx)?; },
                quote! { redlilium_persist::Persist::deserialize_fields(&mut self.#member, ctx)?; },
            )
        } else if attrs.owned {
            (
                quote! { ctx.write_owned(#key, &self.#member)?; },
                quote! { ctx.read_owned(#key, &mut self.#member)?; },
            )
        } else if attrs.renamed_from.is_empty() {
            (
                quote! { ctx.write(#key, &self.#member)?; },
                quote! { ctx.read(#key, &mut self.#member)?; },
            )
        } else {
            let old = &attrs.renamed_from;
            (
                quote! { ctx.write(#key, &self.#member)?; },
                quote! { ctx.read_renamed(#key, &[#(#old),*], &mut self.#member)?; },
            )
        };

        let (write, read) = match attrs.removed_in {
            Some(version) => (
                quote! { if ctx.version() < #version { #write } },
                quote! { if ctx.version() < #version { #read } },
            ),
            None => (write, read),
        };

        if attrs.flatten {
            flatten_writes.push(write);
            flatten_reads.push(read);
        } else {
            writes.push(write);
            reads.push(read);
        }
    }

    let persist_impl = quote! {
        impl #impl_generics redlilium_persist::Persist for #name #ty_generics #where_clause {
            fn serialize_fields(
                &self,
                ctx: &mut redlilium_persist::SerializeContext<'_>,
            ) -> ::core::result::Result<(), redlilium_persist::SerializeError> {
                let _ = &ctx;
                #(#writes)*
                #(#flatten_writes)*
                ::core::result::Result::Ok(())
            }

            fn deserialize_fields(
                &mut self,
                ctx: &mut redlilium_persist::DeserializeContext<'_>,
            ) -> ::core::result::Result<(), redlilium_persist::DeserializeError> {
                let _ = &ctx;
                #(#reads)*
                #(#flatten_reads)*
                ::core::result::Result::Ok(())
            }
        }
    };

    if struct_attrs.root {
        return Ok(persist_impl);
    }

    Ok(quote! {
        #persist_impl

        impl #impl_generics redlilium_persist::Field for #name #ty_generics #where_clause {
            fn write_value(
                &self,
                ctx: &mut redlilium_persist::SerializeContext<'_>,
            ) -> ::core::result::Result<
                ::core::option::Option<redlilium_persist::Value>,
                redlilium_persist::SerializeError,
            > {
                ctx.nested_value(|ctx| redlilium_persist::Persist::serialize_fields(self, ctx))
                    .map(::core::option::Option::Some)
            }

            fn read_value(
                &mut self,
                node: &redlilium_persist::Value,
                ctx: &mut redlilium_persist::DeserializeContext<'_>,
            ) -> ::core::result::Result<(), redlilium_persist::DeserializeError> {
                ctx.read_nested_node(node, |ctx| {
                    redlilium_persist::Persist::deserialize_fields(self, ctx)
                })
            }

            fn read_element(
                node: &redlilium_persist::Value,
                ctx: &mut redlilium_persist::DeserializeContext<'_>,
            ) -> ::core::result::Result<
                ::core::option::Option<Self>,
                redlilium_persist::DeserializeError,
            > {
                let mut value = <Self as ::core::default::Default>::default();
                redlilium_persist::Field::read_value(&mut value, node, ctx)?;
                ::core::result::Result::Ok(::core::option::Option::Some(value))
            }
        }
    })
}
