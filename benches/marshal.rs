//! Marshaling and call-path benchmarks
//!
//! Measures value conversion and the fixed vs. variadic call paths against
//! the in-process mock engine, so only this crate's overhead is timed.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dynffi::abi::mock::{self, MockEngine};
use dynffi::marshal::{to_native, to_script};
use dynffi::{CallInterface, CallingConvention, FieldKey, NativeObject, Primitive, TypeRegistry, Value};
use std::rc::Rc;

fn bench_scalars(c: &mut Criterion) {
    let types = TypeRegistry::new(Rc::new(MockEngine::new()));
    let mut group = c.benchmark_group("scalar");

    for primitive in [Primitive::I32, Primitive::U64, Primitive::F64, Primitive::LongDouble] {
        let descriptor = types.primitive(primitive);
        group.bench_with_input(
            BenchmarkId::new("round_trip", descriptor.to_string()),
            &descriptor,
            |b, descriptor| {
                let mut buf = [0u8; 16];
                b.iter(|| unsafe {
                    to_native(black_box(&Value::Int(300)), descriptor, buf.as_mut_ptr()).unwrap();
                    to_script(buf.as_ptr(), descriptor).unwrap()
                });
            },
        );
    }

    group.finish();
}

fn bench_struct_fields(c: &mut Criterion) {
    let types = TypeRegistry::new(Rc::new(MockEngine::new()));
    let members: Vec<_> = (0..8).map(|_| (types.primitive(Primitive::F64), None)).collect();
    let record = types.struct_of(&members).unwrap();
    let object = NativeObject::allocate(&record, 1).unwrap();

    c.bench_function("struct/set_get_field", |b| {
        b.iter(|| {
            object.set_field(&[FieldKey::Index(8)], black_box(&Value::Float(1.5))).unwrap();
            object.get_field(&[FieldKey::Index(8)]).unwrap()
        });
    });
}

fn bench_calls(c: &mut Criterion) {
    let engine = Rc::new(MockEngine::new());
    let types = TypeRegistry::new(engine.clone());
    let int32 = types.primitive(Primitive::I32);
    let sum = engine.register(|plan, args, result| unsafe {
        let total: i32 = (0..plan.arg_types().len()).map(|i| mock::arg::<i32>(args, i)).sum();
        mock::set_return(result, total);
    });
    let interface = CallInterface::build(&*engine, int32.clone(), vec![int32.clone(); 2], CallingConvention::C).unwrap();

    let mut group = c.benchmark_group("call");
    for nargs in [2usize, 4, 8] {
        let args: Vec<Value> = (0..nargs as i64).map(Value::Int).collect();
        group.bench_with_input(BenchmarkId::new("invoke", nargs), &args, |b, args| {
            b.iter(|| unsafe { interface.invoke(&types, sum, black_box(args)).unwrap() });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_scalars, bench_struct_fields, bench_calls);
criterion_main!(benches);
