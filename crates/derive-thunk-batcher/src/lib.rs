use darling::FromMeta;
use proc_macro2::{Span, TokenStream};
use quote::quote;
use syn::{
  parse::Error, parse_macro_input, AttributeArgs, GenericArgument, ItemImpl, PathArguments, Type,
};

#[derive(Default, FromMeta)]
#[darling(default)]
struct BatchOpt {
  max_batch_size: Option<usize>,
  time_window_ms: Option<u64>,
  instant: bool,
  concurrency: Option<usize>,
  queue_depth: Option<usize>,
}

fn compile_error(message: &str) -> proc_macro::TokenStream {
  Error::new(Span::call_site(), message)
    .into_compile_error()
    .into()
}

/// Implement [AutoBatch](https://docs.rs/thunk-batcher/latest/thunk_batcher/trait.AutoBatch.html) from a [BulkAction](https://docs.rs/thunk-batcher/latest/thunk_batcher/trait.BulkAction.html) impl, declaring its batching options inline
///
/// Options: `max_batch_size = N`, `time_window_ms = N` or `instant`, `concurrency = N` and
/// `queue_depth = N`. Omitted options keep the `BatcherOptions` defaults
#[proc_macro_attribute]
pub fn bulk_action(
  args: proc_macro::TokenStream,
  input: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
  let attr_args = parse_macro_input!(args as AttributeArgs);
  let mut input = parse_macro_input!(input as ItemImpl);

  input.attrs = vec![];

  let BatchOpt {
    max_batch_size,
    time_window_ms,
    instant,
    concurrency,
    queue_depth,
  } = match BatchOpt::from_list(&attr_args) {
    Ok(attr) => attr,
    Err(err) => {
      return err.write_errors().into();
    }
  };

  if time_window_ms.eq(&Some(0)) {
    return compile_error("time_window_ms must be greater than 0, or use `instant`");
  }

  if instant && time_window_ms.is_some() {
    return compile_error("`instant` cannot be combined with time_window_ms");
  }

  if concurrency.eq(&Some(0)) {
    return compile_error("concurrency must be greater than 0");
  }

  if queue_depth.is_some() && concurrency.is_none() {
    return compile_error("queue_depth requires concurrency");
  }

  let trait_types = match &input.trait_ {
    Some((_, path, _)) => {
      let segments: Vec<_> = path
        .segments
        .iter()
        .map(|segment| segment.ident.to_string())
        .collect();

      match *segments
        .iter()
        .map(String::as_ref)
        .collect::<Vec<&str>>()
        .as_slice()
      {
        ["thunk_batcher", "BulkAction"] | ["BulkAction"] => path
          .segments
          .last()
          .map(|segment| type_args(&segment.arguments)),
        _ => None,
      }
    }
    None => None,
  };

  let (req, res) = match trait_types.as_deref() {
    Some([req, res]) => ((*req).clone(), (*res).clone()),
    Some(_) => {
      return compile_error("BulkAction must name its request and response types");
    }
    None => {
      return compile_error("must be used on a BulkAction impl");
    }
  };

  let ident = &input.self_ty;
  let (impl_generics, _, where_clause) = input.generics.split_for_impl();

  let mut builder = TokenStream::new();

  if let Some(max_batch_size) = max_batch_size {
    builder.extend(quote!(.max_batch_size(#max_batch_size)));
  }

  if instant {
    builder.extend(quote!(.scheduler(thunk_batcher::InstantScheduler)));
  }

  if let Some(time_window_ms) = time_window_ms {
    builder.extend(quote!(
      .time_window(std::time::Duration::from_millis(#time_window_ms))
    ));
  }

  match (concurrency, queue_depth) {
    (Some(concurrency), Some(queue_depth)) => builder.extend(quote!(
      .concurrency_control(
        thunk_batcher::LimitedConcurrency::with_queue_depth(#concurrency, #queue_depth)
      )
    )),
    (Some(concurrency), None) => builder.extend(quote!(.concurrency_limit(#concurrency))),
    _ => {}
  }

  let expanded = quote!(
    #[thunk_batcher::async_trait]
    #input

    impl #impl_generics thunk_batcher::AutoBatch<#req, #res> for #ident #where_clause {
      fn options() -> thunk_batcher::BatcherOptions {
        thunk_batcher::BatcherOptions::new()#builder
      }
    }
  );

  expanded.into()
}

fn type_args(arguments: &PathArguments) -> Vec<&Type> {
  match arguments {
    PathArguments::AngleBracketed(generic) => generic
      .args
      .iter()
      .filter_map(|arg| match arg {
        GenericArgument::Type(ty) => Some(ty),
        _ => None,
      })
      .collect(),
    _ => vec![],
  }
}
