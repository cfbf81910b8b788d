use a3ot_modbus_engine::{
    decode_rtu, decode_tcp, encode_ascii, encode_rtu, encode_tcp, ExceptionCode, Handled, Handler, ModbusEvent,
    ModbusServer, Pdu, Profile, RegisterStore, RegisterType, ServerConfig,
};

fn pdu(bytes: &[u8]) -> Pdu {
    Pdu::from_bytes(bytes).unwrap()
}

fn server(profile: Profile) -> ModbusServer<Vec<ModbusEvent>> {
    ModbusServer::new(profile, 1, RegisterStore::new(32, 32, 16, 16), Vec::new())
}

fn exception_events(events: &[ModbusEvent]) -> Vec<&ModbusEvent> {
    events.iter().filter(|e| matches!(e, ModbusEvent::Exception { .. })).collect()
}

#[cfg(test)]
mod dispatch_tests {
    use super::*;

    #[test]
    fn test_unsupported_function_is_illegal_function() {
        let mut server = server(Profile::Tcp);
        let response = server.process_request_pdu(&pdu(&[0x2B, 0x0E, 0x01, 0x00]));
        assert_eq!(response.to_bytes(), vec![0xAB, 0x01]);
        assert_eq!(
            server.sink().as_slice(),
            &[ModbusEvent::Exception { function_code: 0x2B, exception: ExceptionCode::IllegalFunction }]
        );
    }

    #[test]
    fn test_out_of_range_address_on_every_function() {
        let requests = [
            pdu(&[0x01, 0x00, 0x1F, 0x00, 0x02]),
            pdu(&[0x02, 0x00, 0x20, 0x00, 0x01]),
            pdu(&[0x03, 0x00, 0x0F, 0x00, 0x02]),
            pdu(&[0x04, 0x00, 0x10, 0x00, 0x01]),
            pdu(&[0x05, 0x00, 0x20, 0xFF, 0x00]),
            pdu(&[0x06, 0x00, 0x10, 0x00, 0x01]),
            pdu(&[0x0F, 0x00, 0x1F, 0x00, 0x02, 0x01, 0x03]),
            pdu(&[0x10, 0x00, 0x0F, 0x00, 0x02, 0x04, 0x00, 0x01, 0x00, 0x02]),
            pdu(&[0x16, 0x00, 0x10, 0xFF, 0xFF, 0x00, 0x00]),
            pdu(&[0x17, 0x00, 0x10, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x02, 0x00, 0x01]),
        ];
        for request in requests {
            let mut server = server(Profile::Tcp);
            let response = server.process_request_pdu(&request);
            assert_eq!(response.to_bytes(), vec![request.function_code() | 0x80, 0x02], "{:?}", request);
            let events = server.sink();
            assert_eq!(events.len(), 1, "{:?}", request);
            assert_eq!(exception_events(events).len(), 1);
        }
    }

    #[test]
    fn test_read_coils_from_aligned_buffer() {
        let mut server = server(Profile::Tcp);
        server.store_mut().raw_mut(RegisterType::CoilRegister)[0] = 0x0F;
        let response = server.process_request_pdu(&pdu(&[0x01, 0x00, 0x00, 0x00, 0x03]));
        assert_eq!(response.to_bytes(), vec![0x01, 0x01, 0x07]);
        assert!(server.sink().is_empty());
    }

    #[test]
    fn test_read_discrete_inputs_spanning_bytes() {
        let mut server = server(Profile::Tcp);
        for address in [1u16, 8, 9, 10] {
            server.store_mut().set_discrete_input(address, true).unwrap();
        }
        let response = server.process_request_pdu(&pdu(&[0x02, 0x00, 0x01, 0x00, 0x0A]));
        assert_eq!(response.to_bytes(), vec![0x02, 0x02, 0x81, 0x03]);
    }

    #[test]
    fn test_read_registers_big_endian() {
        let mut server = server(Profile::Tcp);
        server.store_mut().set_holding_register(2, 0x1234).unwrap();
        server.store_mut().set_holding_register(3, 0xABCD).unwrap();
        server.store_mut().set_input_register(0, 0x0102).unwrap();

        let response = server.process_request_pdu(&pdu(&[0x03, 0x00, 0x02, 0x00, 0x02]));
        assert_eq!(response.to_bytes(), vec![0x03, 0x04, 0x12, 0x34, 0xAB, 0xCD]);

        let response = server.process_request_pdu(&pdu(&[0x04, 0x00, 0x00, 0x00, 0x01]));
        assert_eq!(response.to_bytes(), vec![0x04, 0x02, 0x01, 0x02]);
    }

    #[test]
    fn test_read_quantity_limits() {
        let mut server = server(Profile::Tcp);
        let response = server.process_request_pdu(&pdu(&[0x03, 0x00, 0x00, 0x00, 0x00]));
        assert_eq!(response.to_bytes(), vec![0x83, 0x03]);
        let response = server.process_request_pdu(&pdu(&[0x03, 0x00, 0x00, 0x00, 0x7E]));
        assert_eq!(response.to_bytes(), vec![0x83, 0x03]);
        let response = server.process_request_pdu(&pdu(&[0x03, 0x00, 0x00]));
        assert_eq!(response.to_bytes(), vec![0x83, 0x03]);
    }

    #[test]
    fn test_write_single_coil() {
        let mut server = server(Profile::Tcp);
        let request = pdu(&[0x05, 0x00, 0x03, 0xFF, 0x00]);
        assert_eq!(server.process_request_pdu(&request), request);
        assert_eq!(server.store().coil(3), Ok(true));

        let bad = pdu(&[0x05, 0x00, 0x03, 0x00, 0x01]);
        assert_eq!(server.process_request_pdu(&bad).to_bytes(), vec![0x85, 0x03]);
        assert_eq!(server.store().coil(3), Ok(true));

        assert_eq!(
            server.sink().as_slice(),
            &[
                ModbusEvent::WriteCoils { address: 3, quantity: 1 },
                ModbusEvent::Exception { function_code: 0x05, exception: ExceptionCode::IllegalDataValue },
            ]
        );
    }

    #[test]
    fn test_write_multiple_coils() {
        let mut server = server(Profile::Tcp);
        let response = server.process_request_pdu(&pdu(&[0x0F, 0x00, 0x02, 0x00, 0x0A, 0x02, 0xCD, 0x01]));
        assert_eq!(response.to_bytes(), vec![0x0F, 0x00, 0x02, 0x00, 0x0A]);
        let coils: Vec<bool> = (2..12).map(|a| server.store().coil(a).unwrap()).collect();
        assert_eq!(coils, vec![true, false, true, true, false, false, true, true, true, false]);
        assert_eq!(server.sink().as_slice(), &[ModbusEvent::WriteCoils { address: 2, quantity: 10 }]);
    }

    #[test]
    fn test_write_multiple_coils_byte_count_mismatch() {
        let mut server = server(Profile::Tcp);
        let response = server.process_request_pdu(&pdu(&[0x0F, 0x00, 0x00, 0x00, 0x0A, 0x01, 0xCD]));
        assert_eq!(response.to_bytes(), vec![0x8F, 0x03]);
    }

    #[test]
    fn test_write_registers() {
        let mut server = server(Profile::Tcp);
        let request = pdu(&[0x06, 0x00, 0x01, 0x00, 0x03]);
        assert_eq!(server.process_request_pdu(&request), request);

        let response = server.process_request_pdu(&pdu(&[0x10, 0x00, 0x04, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02]));
        assert_eq!(response.to_bytes(), vec![0x10, 0x00, 0x04, 0x00, 0x02]);
        assert_eq!(server.store().holding_register(1), Ok(3));
        assert_eq!(server.store().holding_register(4), Ok(0x000A));
        assert_eq!(server.store().holding_register(5), Ok(0x0102));

        let mismatch = server.process_request_pdu(&pdu(&[0x10, 0x00, 0x04, 0x00, 0x02, 0x02, 0x00, 0x0A]));
        assert_eq!(mismatch.to_bytes(), vec![0x90, 0x03]);

        assert_eq!(
            &server.sink()[..2],
            &[
                ModbusEvent::WriteRegisters { address: 1, quantity: 1 },
                ModbusEvent::WriteRegisters { address: 4, quantity: 2 },
            ]
        );
    }

    #[test]
    fn test_mask_write_register() {
        let mut server = server(Profile::Tcp);
        server.store_mut().set_holding_register(4, 0x0012).unwrap();
        let request = pdu(&[0x16, 0x00, 0x04, 0x00, 0xF2, 0x00, 0x25]);
        assert_eq!(server.process_request_pdu(&request), request);
        assert_eq!(server.store().holding_register(4), Ok(0x0017));
        assert_eq!(server.sink().as_slice(), &[ModbusEvent::WriteRegisters { address: 4, quantity: 1 }]);
    }

    #[test]
    fn test_read_write_multiple_overlapping() {
        let mut server = server(Profile::Tcp);
        server.store_mut().set_holding_register(0, 0x1111).unwrap();
        let response = server.process_request_pdu(&pdu(&[
            0x17, 0x00, 0x00, 0x00, 0x03, 0x00, 0x01, 0x00, 0x02, 0x04, 0xAA, 0xAA, 0xBB, 0xBB,
        ]));
        assert_eq!(response.to_bytes(), vec![0x17, 0x06, 0x11, 0x11, 0xAA, 0xAA, 0xBB, 0xBB]);
    }

    #[test]
    fn test_register_custom_handler() {
        let mut server = server(Profile::Tcp);
        // report server id
        server.register_handler(
            0x11,
            Handler::custom(|_store: &mut RegisterStore, request: &Pdu| {
                Ok(Handled::read(Pdu::new(request.function_code(), vec![0x02, 0x2A, 0xFF])))
            }),
        );
        assert!(server.supports(0x11));
        let response = server.process_request_pdu(&pdu(&[0x11]));
        assert_eq!(response.to_bytes(), vec![0x11, 0x02, 0x2A, 0xFF]);

        let previous = server.register_handler(
            0x06,
            Handler::custom(|_store: &mut RegisterStore, _request: &Pdu| Err(ExceptionCode::SlaveDeviceBusy)),
        );
        assert!(matches!(previous, Some(Handler::Builtin(_))));
        let response = server.process_request_pdu(&pdu(&[0x06, 0x00, 0x01, 0x00, 0x03]));
        assert_eq!(response.to_bytes(), vec![0x86, 0x06]);

        server.unregister_handler(0x06);
        let response = server.process_request_pdu(&pdu(&[0x06, 0x00, 0x01, 0x00, 0x03]));
        assert_eq!(response.to_bytes(), vec![0x86, 0x01]);
    }
}

#[cfg(test)]
mod framing_tests {
    use super::*;

    #[test]
    fn test_tcp_response_keeps_header() {
        let mut server = server(Profile::Tcp);
        let request = encode_tcp(0x1234, 9, &pdu(&[0x06, 0x00, 0x01, 0x00, 0x03])).unwrap();
        let response = server.get_response_adu(&request).unwrap().unwrap();
        let adu = decode_tcp(&response).unwrap();
        assert_eq!(adu.header.transaction_id, 0x1234);
        assert_eq!(adu.header.unit_id, 9);
        assert_eq!(adu.pdu, pdu(&[0x06, 0x00, 0x01, 0x00, 0x03]));

        let names: Vec<&str> = server.sink().iter().map(ModbusEvent::name).collect();
        assert_eq!(names, vec!["request", "write-registers", "response"]);
    }

    #[test]
    fn test_tcp_malformed_frame_is_error() {
        let mut server = server(Profile::Tcp);
        assert!(server.get_response_adu(&[0x00, 0x01, 0x00, 0x05, 0x00, 0x02, 0x01, 0x03]).is_err());
    }

    #[test]
    fn test_tcp_stream_with_coalesced_frames() {
        let mut server = server(Profile::Tcp);
        let mut chunk = encode_tcp(1, 1, &pdu(&[0x03, 0x00, 0x00, 0x00, 0x01])).unwrap();
        chunk.extend(encode_tcp(2, 1, &pdu(&[0x04, 0x00, 0x00, 0x00, 0x01])).unwrap());
        let second = encode_tcp(3, 1, &pdu(&[0x01, 0x00, 0x00, 0x00, 0x01])).unwrap();
        chunk.extend(&second[..5]);

        let responses = server.process_stream(&chunk);
        assert_eq!(responses.len(), 2);
        assert_eq!(decode_tcp(&responses[1]).unwrap().header.transaction_id, 2);

        let responses = server.process_stream(&second[5..]);
        assert_eq!(responses.len(), 1);
        assert_eq!(decode_tcp(&responses[0]).unwrap().header.transaction_id, 3);
    }

    #[test]
    fn test_rtu_diagnostics() {
        let mut server = server(Profile::Rtu);

        // addressed to us
        let response = server.get_response_adu(&encode_rtu(1, &pdu(&[0x03, 0x00, 0x00, 0x00, 0x01])).unwrap()).unwrap();
        let adu = decode_rtu(&response.unwrap()).unwrap();
        assert!(adu.crc_valid);
        assert_eq!(adu.pdu.to_bytes(), vec![0x03, 0x02, 0x00, 0x00]);

        // broadcast executes silently
        let broadcast = encode_rtu(0, &pdu(&[0x06, 0x00, 0x02, 0x00, 0x07])).unwrap();
        assert_eq!(server.get_response_adu(&broadcast).unwrap(), None);
        assert_eq!(server.store().holding_register(2), Ok(7));

        // another slave
        assert_eq!(server.get_response_adu(&encode_rtu(5, &pdu(&[0x03, 0, 0, 0, 1])).unwrap()).unwrap(), None);

        // corrupt CRC and runt frame
        let mut corrupt = encode_rtu(1, &pdu(&[0x03, 0, 0, 0, 1])).unwrap();
        corrupt[2] ^= 0x01;
        assert_eq!(server.get_response_adu(&corrupt).unwrap(), None);
        assert_eq!(server.get_response_adu(&[0x01, 0x03]).unwrap(), None);

        // exception
        let response = server.get_response_adu(&encode_rtu(1, &pdu(&[0x03, 0x00, 0x20, 0x00, 0x01])).unwrap()).unwrap();
        assert_eq!(decode_rtu(&response.unwrap()).unwrap().pdu.to_bytes(), vec![0x83, 0x02]);

        let diagnostics = server.diagnostics();
        assert_eq!(diagnostics.bus_message_count, 4);
        assert_eq!(diagnostics.bus_communication_error_count, 2);
        assert_eq!(diagnostics.slave_message_count, 2);
        assert_eq!(diagnostics.slave_no_response_count, 1);
        assert_eq!(diagnostics.slave_exception_error_count, 1);
        assert_eq!(diagnostics.slave_nak_count, 0);
        assert_eq!(diagnostics.slave_busy_count, 0);

        server.clear_diagnostics();
        assert_eq!(server.diagnostics().bus_message_count, 0);
    }

    #[test]
    fn test_busy_and_acknowledge_counters() {
        let mut server = server(Profile::Rtu);
        server.register_handler(
            0x41,
            Handler::custom(|_store: &mut RegisterStore, _request: &Pdu| Err(ExceptionCode::Acknowledge)),
        );
        server.register_handler(
            0x42,
            Handler::custom(|_store: &mut RegisterStore, _request: &Pdu| Err(ExceptionCode::SlaveDeviceBusy)),
        );
        server.get_response_adu(&encode_rtu(1, &pdu(&[0x41])).unwrap()).unwrap();
        server.get_response_adu(&encode_rtu(1, &pdu(&[0x42])).unwrap()).unwrap();
        server.get_response_adu(&encode_rtu(1, &pdu(&[0x42])).unwrap()).unwrap();

        let diagnostics = server.diagnostics();
        assert_eq!(diagnostics.slave_exception_error_count, 3);
        assert_eq!(diagnostics.slave_nak_count, 1);
        assert_eq!(diagnostics.slave_busy_count, 2);
    }

    #[test]
    fn test_ascii_server_round_trip() {
        let config = ServerConfig::from_json(r#"{"profile":"ascii","unit_id":10,"holding_registers":4}"#).unwrap();
        let mut server = ModbusServer::from_config(&config, Vec::new());
        server.store_mut().set_holding_register(0, 0x0102).unwrap();
        server.store_mut().set_holding_register(1, 0x0304).unwrap();

        let response = server.get_response_adu(b":0A0300000002F1\r\n").unwrap().unwrap();
        let expected = encode_ascii(10, &pdu(&[0x03, 0x04, 0x01, 0x02, 0x03, 0x04])).unwrap();
        assert_eq!(response, expected);

        assert_eq!(server.get_response_adu(b":0A0300000002F2\r\n").unwrap(), None);
        assert_eq!(server.diagnostics().bus_communication_error_count, 1);
    }

    #[test]
    fn test_character_overrun_counter() {
        let mut server = server(Profile::Rtu);
        server.record_character_overrun();
        assert_eq!(server.diagnostics().bus_character_overrun_count, 1);
    }
}
