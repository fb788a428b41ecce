use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{Data, DeriveInput, Fields, Ident, LitStr, parse_macro_input};

/// Convert snake_case to camelCase
fn to_camel_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut capitalize_next = false;

    for c in s.chars() {
        if c == '_' {
            capitalize_next = true;
        } else if capitalize_next {
            result.push(c.to_ascii_uppercase());
            capitalize_next = false;
        } else {
            result.push(c);
        }
    }

    result
}

/// Lower the first character: `OrderLine` -> `orderLine`
fn to_lower_camel(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_ascii_lowercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

/// Struct-level `#[model(...)]` options
#[derive(Default)]
struct ModelAttrs {
    name: Option<String>,
    table: Option<String>,
}

fn parse_model_attrs(input: &DeriveInput) -> syn::Result<ModelAttrs> {
    let mut attrs = ModelAttrs::default();
    for attr in &input.attrs {
        if !attr.path().is_ident("model") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                attrs.name = Some(meta.value()?.parse::<LitStr>()?.value());
            } else if meta.path.is_ident("table") {
                attrs.table = Some(meta.value()?.parse::<LitStr>()?.value());
            } else {
                return Err(meta.error("expected `name` or `table`"));
            }
            Ok(())
        })?;
    }
    Ok(attrs)
}

/// Field-level `#[field(...)]` options
#[derive(Default)]
struct FieldAttrs {
    name: Option<String>,
    column: Option<String>,
    category: Option<String>,
    references: Option<String>,
    forbid: Vec<Ident>,
    hidden: bool,
    skip: bool,
}

fn parse_field_attrs(field: &syn::Field) -> syn::Result<FieldAttrs> {
    let mut attrs = FieldAttrs::default();
    for attr in &field.attrs {
        if !attr.path().is_ident("field") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            let path = &meta.path;
            if path.is_ident("name") {
                attrs.name = Some(meta.value()?.parse::<LitStr>()?.value());
            } else if path.is_ident("column") {
                attrs.column = Some(meta.value()?.parse::<LitStr>()?.value());
            } else if path.is_ident("category") {
                attrs.category = Some(meta.value()?.parse::<LitStr>()?.value());
            } else if path.is_ident("references") {
                attrs.references = Some(meta.value()?.parse::<LitStr>()?.value());
            } else if path.is_ident("root_only") {
                attrs.forbid.push(variant_ident("create", path)?);
                attrs.forbid.push(variant_ident("update", path)?);
            } else if path.is_ident("immutable") {
                attrs.forbid.push(variant_ident("update", path)?);
            } else if path.is_ident("write_only") {
                attrs.forbid.push(variant_ident("root", path)?);
            } else if path.is_ident("forbid") {
                meta.parse_nested_meta(|inner| {
                    let variant = inner
                        .path
                        .get_ident()
                        .map(|i| i.to_string())
                        .unwrap_or_default();
                    attrs.forbid.push(variant_ident(&variant, &inner.path)?);
                    Ok(())
                })?;
            } else if path.is_ident("hidden") {
                attrs.hidden = true;
            } else if path.is_ident("skip") {
                attrs.skip = true;
            } else {
                return Err(meta.error("unknown field option"));
            }
            Ok(())
        })?;
    }
    Ok(attrs)
}

fn variant_ident(variant: &str, span: &syn::Path) -> syn::Result<Ident> {
    let name = match variant {
        "root" => "Root",
        "create" => "Create",
        "update" => "Update",
        _ => {
            return Err(syn::Error::new_spanned(
                span,
                "expected one of `root`, `create`, `update`",
            ));
        }
    };
    Ok(Ident::new(name, proc_macro2::Span::call_site()))
}

/// Map a Rust type to its value kind and, when the kind's default storage
/// category does not fit, a category override.
fn rust_type_to_kind(ty: &syn::Type) -> (&'static str, Option<&'static str>) {
    let type_str = quote!(#ty).to_string().replace(' ', "");

    // Option<T> - look at the inner type
    let inner_type = if type_str.starts_with("Option<") && type_str.ends_with('>') {
        &type_str[7..type_str.len() - 1]
    } else {
        type_str.as_str()
    };

    match inner_type {
        "bool" => ("Boolean", None),
        "i64" | "u64" | "isize" | "usize" => ("Number", Some("int8")),
        "i8" | "i16" | "i32" | "u8" | "u16" | "u32" => ("Number", None),
        "f32" | "f64" => ("Number", Some("float8")),
        "String" | "&str" | "&'staticstr" => ("String", None),
        "Vec<String>" => ("Array", Some("text[]")),
        "Vec<i32>" | "Vec<i16>" | "Vec<u16>" | "Vec<u8>" => ("Array", Some("int[]")),
        s if s.starts_with("Vec<") => ("Array", None),
        s if s.contains("DateTime") || s.contains("StorageDatetime") => ("Date", None),
        _ => ("Object", None),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    name,
                    "Model only supports structs with named fields",
                ));
            }
        },
        _ => return Err(syn::Error::new_spanned(name, "Model only supports structs")),
    };

    let model = parse_model_attrs(input)?;
    let type_name = model
        .name
        .unwrap_or_else(|| to_lower_camel(&name.to_string()));

    let table_call = model.table.map(|table| quote! { .table(#table) });

    let mut field_specs = Vec::new();
    let mut hidden = Vec::new();

    for field in fields.iter() {
        let attrs = parse_field_attrs(field)?;
        if attrs.skip {
            continue;
        }

        let Some(ident) = field.ident.as_ref() else {
            continue;
        };
        let rust_name = ident.to_string();
        let rust_name = rust_name.strip_prefix("r#").unwrap_or(&rust_name);
        let logical = attrs.name.unwrap_or_else(|| to_camel_case(rust_name));

        let (kind, inferred_category) = rust_type_to_kind(&field.ty);
        let kind = Ident::new(kind, proc_macro2::Span::call_site());

        // Columns default to the Rust field name
        let column = attrs.column.unwrap_or_else(|| rust_name.to_string());
        let column_call = (column != logical).then(|| quote! { .column(#column) });

        let category_call = attrs
            .category
            .or(inferred_category.map(str::to_string))
            .map(|category| quote! { .category(#category) });
        let references_call = attrs
            .references
            .map(|reference| quote! { .references(#reference) });
        let forbid_calls = attrs.forbid.iter().map(|variant| {
            quote! { .forbid(::servosaur_storage::Variant::#variant) }
        });

        if attrs.hidden {
            hidden.push(logical.clone());
        }

        field_specs.push(quote! {
            ::servosaur_storage::FieldSpec::new(#logical, ::servosaur_storage::ValueKind::#kind)
                #column_call
                #category_call
                #references_call
                #(#forbid_calls)*
        });
    }

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::servosaur_storage::Model for #name #ty_generics #where_clause {
            const TYPE_NAME: &'static str = #type_name;

            fn schema() -> ::servosaur_storage::Schema {
                ::servosaur_storage::Schema::new()
                    #table_call
                    #(.field(#field_specs))*
            }

            fn hidden_fields() -> &'static [&'static str] {
                &[#(#hidden),*]
            }
        }
    })
}

/// Derive macro for the `Model` trait.
///
/// Builds the schema of an entity type from its struct fields. Each field
/// becomes a declared key named after the camelCase form of the field name
/// (matching `#[serde(rename_all = "camelCase")]`), stored in a column named
/// after the field itself.
///
/// ## Struct options: `#[model(...)]`
///
/// - `name = "..."` - registered type name (default: struct name, lower camelCase)
/// - `table = "..."` - storage table (default: the type name)
///
/// ## Field options: `#[field(...)]`
///
/// - `name = "..."` - logical name override
/// - `column = "..."` - storage column override
/// - `category = "..."` - storage category, e.g. `"jsonb"` or `"text[]"`
/// - `references = "type.field"` - foreign key filled from the batch ledger
/// - `root_only` - readable, never written (forbidden in create and update)
/// - `immutable` - set on create only (forbidden in update)
/// - `write_only` - accepted on writes, never read back
/// - `forbid(create, update, root)` - forbid in the listed variants
/// - `hidden` - left out of `Entity::represent`
/// - `skip` - not part of the schema
///
/// ## Example
///
/// ```text
/// #[derive(Model, Serialize, Deserialize)]
/// #[serde(rename_all = "camelCase")]
/// #[model(table = "order_line")]
/// struct OrderLine {
///     #[field(root_only)]
///     id: Option<i32>,
///     #[field(references = "order.id")]
///     order_id: Option<i32>,
///     sku: String,
/// }
/// ```
#[proc_macro_derive(Model, attributes(model, field))]
pub fn derive_model(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}
