use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sipua::parser::Parser;

fn bench_parse_sip_msg(c: &mut Criterion) {
    let buf = b"INVITE sip:bob@biloxi.example.com SIP/2.0\r\n\
Via: SIP/2.0/UDP client.atlanta.example.com:5060;ttl=65;branch=z9hG4bK74bf9\r\n\
Max-Forwards: 70\r\n\
From: Alice <sip:alice@atlanta.example.com>;tag=9fxced76sl\r\n\
To: Bob <sip:bob@biloxi.example.com>\r\n\
Call-ID: 3848276298220188511@atlanta.example.com\r\n\
CSeq: 2 INVITE\r\n\
Contact: <sip:alice@client.atlanta.example.com;transport=udp>\r\n\
Record-Route: <sip:p1.atlanta.example.com;lr>\r\n\
Record-Route: <sip:p2.biloxi.example.com;lr>\r\n\
Allow: INVITE, ACK, OPTIONS, CANCEL, BYE\r\n\
User-Agent: bench stamp 56125\r\n\
Content-Type: application/sdp\r\n\
Content-Length: 0\r\n\r\n";

    c.bench_function("parse invite", |b| {
        b.iter(|| {
            let mut parser = Parser::new(black_box(buf));
            let msg = parser.parse_sip_msg().unwrap();
            black_box(msg);
        });
    });
}

criterion_group!(benches, bench_parse_sip_msg);
criterion_main!(benches);
